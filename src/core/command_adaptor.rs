// src/core/command_adaptor.rs

//! An adaptor backed by an external program.
//!
//! The program is invoked with a role argument (`lister`, `retriever`,
//! `authorizer`); whatever it writes on stdout is interpreted through
//! [`crate::core::command_stream::CommandStreamParser`]. This is the whole
//! isolation boundary for out-of-process adaptors: one subprocess per
//! invocation, no shared state.

use crate::core::acl::{AuthnIdentity, AuthzStatus};
use crate::core::adaptor::{Adaptor, AuthzAuthority, DocIdPusher, DocRequest, Response};
use crate::core::command_stream::CommandStreamParser;
use crate::core::docid::DocId;
use crate::core::errors::FeedgateError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Shells out to one external program for every adaptor role.
pub struct CommandAdaptor {
    program: PathBuf,
    extra_args: Vec<String>,
}

impl CommandAdaptor {
    pub fn new(program: impl Into<PathBuf>, extra_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            extra_args,
        }
    }

    async fn invoke(&self, role: &str, stdin: Option<&[u8]>) -> Result<Vec<u8>, FeedgateError> {
        let mut command = Command::new(&self.program);
        command
            .arg(role)
            .args(&self.extra_args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        debug!("Invoking {} {role}.", self.program.display());
        let mut child = command.spawn().map_err(|e| {
            FeedgateError::Unavailable(format!(
                "failed to spawn '{}': {e}",
                self.program.display()
            ))
        })?;

        if let Some(input) = stdin {
            let mut child_stdin = child.stdin.take().ok_or_else(|| {
                FeedgateError::Internal("child stdin unavailable".to_string())
            })?;
            child_stdin.write_all(input).await?;
            drop(child_stdin);
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(FeedgateError::Unavailable(format!(
                "'{}' {role} exited with {}",
                self.program.display(),
                output.status
            )));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl Adaptor for CommandAdaptor {
    async fn get_doc_ids(&self, pusher: &dyn DocIdPusher) -> Result<(), FeedgateError> {
        let stdout = self.invoke("lister", None).await?;
        let records = CommandStreamParser::new(&stdout)?.read_from_lister()?;
        if pusher.push_records(records).await?.is_some() {
            return Err(FeedgateError::Interrupted);
        }
        Ok(())
    }

    async fn get_doc_content(
        &self,
        request: &DocRequest,
        response: &mut dyn Response,
    ) -> Result<(), FeedgateError> {
        let stdin = format!("id={}\n", request.doc_id.unique_id());
        let stdout = self.invoke("retriever", Some(stdin.as_bytes())).await?;
        let parsed = CommandStreamParser::new(&stdout)?.read_from_retriever()?;

        if parsed.not_found {
            return Err(FeedgateError::Unavailable(format!(
                "document {} not found",
                request.doc_id
            )));
        }
        if parsed.up_to_date {
            return response.respond_not_modified();
        }
        if parsed.secure {
            response.set_secure(true)?;
        }
        if parsed.no_index {
            response.set_no_index(true)?;
        }
        if parsed.no_follow {
            response.set_no_follow(true)?;
        }
        if parsed.no_archive {
            response.set_no_archive(true)?;
        }
        if parsed.crawl_once {
            response.set_crawl_once(true)?;
        }
        if parsed.lock {
            response.set_lock(true)?;
        }
        if let Some(url) = parsed.display_url {
            response.set_display_url(url)?;
        }
        if let Some(when) = parsed.last_modified {
            response.set_last_modified(when)?;
        }
        for (key, value) in parsed.metadata.iter() {
            response.add_metadata(key, value)?;
        }
        for (uri, text) in parsed.anchors {
            response.add_anchor(uri, text.as_deref())?;
        }
        response.write_content(parsed.content.as_deref().unwrap_or_default())?;
        Ok(())
    }

    fn authz_authority(&self) -> Option<&dyn AuthzAuthority> {
        Some(self)
    }
}

#[async_trait]
impl AuthzAuthority for CommandAdaptor {
    async fn is_user_authorized(
        &self,
        identity: &AuthnIdentity,
        doc_ids: &[DocId],
    ) -> Result<BTreeMap<DocId, AuthzStatus>, FeedgateError> {
        let mut stdin = String::new();
        if let Some(user) = &identity.user {
            stdin.push_str(&format!("username={}\n", user.name()));
        }
        for group in &identity.groups {
            stdin.push_str(&format!("group={}\n", group.name()));
        }
        for doc_id in doc_ids {
            stdin.push_str(&format!("id={}\n", doc_id.unique_id()));
        }

        let stdout = self.invoke("authorizer", Some(stdin.as_bytes())).await?;
        let mut decisions = CommandStreamParser::new(&stdout)?.read_from_authorizer()?;
        // Ids the program did not answer stay undecided.
        for doc_id in doc_ids {
            decisions
                .entry(doc_id.clone())
                .or_insert(AuthzStatus::Indeterminate);
        }
        Ok(decisions)
    }
}
