// src/core/acl.rs

//! Access control lists and their chain evaluation.
//!
//! An `Acl` names the users and groups permitted or denied access to one
//! document, plus an optional inheritance link to a parent document's ACL.
//! Late-binding authorization walks the inheritance chain from root to leaf
//! and combines per-node decisions according to each parent's inheritance
//! type.

use crate::core::docid::DocId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strum_macros::{Display, EnumString};

/// Outcome of evaluating an ACL (or a chain of them) against an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthzStatus {
    Permit,
    Deny,
    Indeterminate,
}

impl AuthzStatus {
    pub fn is_decisive(self) -> bool {
        !matches!(self, AuthzStatus::Indeterminate)
    }
}

/// How a node's decision combines with its child's combined decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
pub enum InheritanceType {
    /// Terminal node; never combined with a child.
    #[default]
    LeafNode,
    /// The parent's decisive answer wins; otherwise the child's.
    ParentOverrides,
    /// The child's decisive answer wins; otherwise the parent's.
    ChildOverrides,
    /// Permit only when both parent and child permit.
    AndBothPermit,
}

/// Whether principal names compare case-sensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CaseSensitivity {
    #[default]
    Sensitive,
    Insensitive,
}

/// How domains are attached to principal names on the feed wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum DomainFormat {
    /// name@domain
    #[default]
    Dns,
    /// domain\name
    Netbios,
    /// domain/name
    NetbiosForwardslash,
    /// Domain information is stripped.
    None,
}

/// A user or group principal with a namespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Principal {
    User { name: String, namespace: String },
    Group { name: String, namespace: String },
}

pub const DEFAULT_NAMESPACE: &str = "Default";

impl Principal {
    pub fn user(name: impl Into<String>) -> Self {
        Principal::User {
            name: name.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    pub fn group(name: impl Into<String>) -> Self {
        Principal::Group {
            name: name.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    pub fn user_in(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Principal::User {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    pub fn group_in(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Principal::Group {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Principal::User { name, .. } | Principal::Group { name, .. } => name,
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            Principal::User { namespace, .. } | Principal::Group { namespace, .. } => namespace,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Principal::Group { .. })
    }

    /// Splits a principal name into (domain, bare name). Both `domain\name`
    /// and `name@domain` spellings are recognized.
    pub fn parse_domain(name: &str) -> (Option<&str>, &str) {
        if let Some((domain, bare)) = name.split_once('\\') {
            (Some(domain), bare)
        } else if let Some((domain, bare)) = name.split_once('/') {
            (Some(domain), bare)
        } else if let Some((bare, domain)) = name.rsplit_once('@') {
            (Some(domain), bare)
        } else {
            (None, name)
        }
    }

    /// Renders the name in the configured wire format.
    pub fn format_name(&self, format: DomainFormat) -> String {
        let (domain, bare) = Self::parse_domain(self.name());
        match (domain, format) {
            (None, _) | (_, DomainFormat::None) => bare.to_string(),
            (Some(d), DomainFormat::Dns) => format!("{bare}@{d}"),
            (Some(d), DomainFormat::Netbios) => format!("{d}\\{bare}"),
            (Some(d), DomainFormat::NetbiosForwardslash) => format!("{d}/{bare}"),
        }
    }

    fn matches(&self, other: &Principal, case: CaseSensitivity) -> bool {
        if self.is_group() != other.is_group() {
            return false;
        }
        if self.namespace() != other.namespace() {
            return false;
        }
        let (d1, n1) = Self::parse_domain(self.name());
        let (d2, n2) = Self::parse_domain(other.name());
        let eq = |a: &str, b: &str| match case {
            CaseSensitivity::Sensitive => a == b,
            CaseSensitivity::Insensitive => a.eq_ignore_ascii_case(b),
        };
        let domains_match = match (d1, d2) {
            (Some(a), Some(b)) => eq(a, b),
            (None, None) => true,
            _ => false,
        };
        domains_match && eq(n1, n2)
    }
}

/// The identity a request was authenticated as: one user plus its groups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthnIdentity {
    pub user: Option<Principal>,
    pub groups: BTreeSet<Principal>,
    pub password: Option<String>,
}

impl AuthnIdentity {
    pub fn for_user(user: Principal) -> Self {
        Self {
            user: Some(user),
            ..Default::default()
        }
    }

    pub fn with_groups(mut self, groups: impl IntoIterator<Item = Principal>) -> Self {
        self.groups = groups.into_iter().collect();
        self
    }
}

/// Reference to the document an ACL inherits from, optionally a fragment of
/// that document's ACL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InheritFrom {
    pub doc_id: DocId,
    pub fragment: Option<String>,
}

/// Permit/deny sets for one document plus the inheritance link.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Acl {
    permit_users: BTreeSet<Principal>,
    deny_users: BTreeSet<Principal>,
    permit_groups: BTreeSet<Principal>,
    deny_groups: BTreeSet<Principal>,
    inherit_from: Option<InheritFrom>,
    inheritance_type: InheritanceType,
    case_sensitivity: CaseSensitivity,
}

/// Chains longer than this are treated as broken. Guards against
/// inherit-from cycles without tracking visited sets at every hop.
pub const MAX_CHAIN_DEPTH: usize = 50;

impl Acl {
    pub fn builder() -> AclBuilder {
        AclBuilder::default()
    }

    /// An ACL that marks the document world-readable.
    pub fn fully_public() -> Acl {
        Acl::default()
    }

    pub fn permit_users(&self) -> &BTreeSet<Principal> {
        &self.permit_users
    }

    pub fn deny_users(&self) -> &BTreeSet<Principal> {
        &self.deny_users
    }

    pub fn permit_groups(&self) -> &BTreeSet<Principal> {
        &self.permit_groups
    }

    pub fn deny_groups(&self) -> &BTreeSet<Principal> {
        &self.deny_groups
    }

    pub fn inherit_from(&self) -> Option<&InheritFrom> {
        self.inherit_from.as_ref()
    }

    pub fn inheritance_type(&self) -> InheritanceType {
        self.inheritance_type
    }

    pub fn case_sensitivity(&self) -> CaseSensitivity {
        self.case_sensitivity
    }

    pub fn is_empty(&self) -> bool {
        self.permit_users.is_empty()
            && self.deny_users.is_empty()
            && self.permit_groups.is_empty()
            && self.deny_groups.is_empty()
            && self.inherit_from.is_none()
    }

    fn identity_in(&self, set: &BTreeSet<Principal>, identity: &AuthnIdentity) -> bool {
        set.iter().any(|member| {
            if member.is_group() {
                identity
                    .groups
                    .iter()
                    .any(|g| member.matches(g, self.case_sensitivity))
            } else {
                identity
                    .user
                    .as_ref()
                    .is_some_and(|u| member.matches(u, self.case_sensitivity))
            }
        })
    }

    /// The decision of this node alone: deny wins over permit, anything else
    /// is indeterminate.
    pub fn decide(&self, identity: &AuthnIdentity) -> AuthzStatus {
        if self.identity_in(&self.deny_users, identity)
            || self.identity_in(&self.deny_groups, identity)
        {
            AuthzStatus::Deny
        } else if self.identity_in(&self.permit_users, identity)
            || self.identity_in(&self.permit_groups, identity)
        {
            AuthzStatus::Permit
        } else {
            AuthzStatus::Indeterminate
        }
    }

    fn combine(parent: AuthzStatus, child: AuthzStatus, ty: InheritanceType) -> AuthzStatus {
        match ty {
            InheritanceType::LeafNode => AuthzStatus::Indeterminate,
            InheritanceType::ParentOverrides => {
                if parent.is_decisive() {
                    parent
                } else {
                    child
                }
            }
            InheritanceType::ChildOverrides => {
                if child.is_decisive() {
                    child
                } else {
                    parent
                }
            }
            InheritanceType::AndBothPermit => {
                if parent == AuthzStatus::Permit && child == AuthzStatus::Permit {
                    AuthzStatus::Permit
                } else if parent != AuthzStatus::Permit {
                    parent
                } else {
                    child
                }
            }
        }
    }

    /// Evaluates an inheritance chain ordered root first, leaf last.
    ///
    /// An empty chain, a chain deeper than [`MAX_CHAIN_DEPTH`], or a chain
    /// whose interior still carries `LeafNode` is broken and yields
    /// `Indeterminate`.
    pub fn evaluate_chain(chain: &[Acl], identity: &AuthnIdentity) -> AuthzStatus {
        if chain.is_empty() || chain.len() > MAX_CHAIN_DEPTH {
            return AuthzStatus::Indeterminate;
        }
        // Interior nodes must declare how they combine with their child.
        if chain[..chain.len() - 1]
            .iter()
            .any(|node| node.inheritance_type == InheritanceType::LeafNode)
        {
            return AuthzStatus::Indeterminate;
        }

        let mut combined = chain[chain.len() - 1].decide(identity);
        for parent in chain[..chain.len() - 1].iter().rev() {
            let parent_decision = parent.decide(identity);
            combined = Self::combine(parent_decision, combined, parent.inheritance_type);
        }
        combined
    }
}

/// Builder for [`Acl`]. Every setter consumes and returns the builder.
#[derive(Debug, Clone, Default)]
pub struct AclBuilder {
    acl: Acl,
}

impl AclBuilder {
    pub fn permit_user(mut self, p: Principal) -> Self {
        self.acl.permit_users.insert(p);
        self
    }

    pub fn deny_user(mut self, p: Principal) -> Self {
        self.acl.deny_users.insert(p);
        self
    }

    pub fn permit_group(mut self, p: Principal) -> Self {
        self.acl.permit_groups.insert(p);
        self
    }

    pub fn deny_group(mut self, p: Principal) -> Self {
        self.acl.deny_groups.insert(p);
        self
    }

    pub fn permit_users(mut self, ps: impl IntoIterator<Item = Principal>) -> Self {
        self.acl.permit_users.extend(ps);
        self
    }

    pub fn deny_users(mut self, ps: impl IntoIterator<Item = Principal>) -> Self {
        self.acl.deny_users.extend(ps);
        self
    }

    pub fn permit_groups(mut self, ps: impl IntoIterator<Item = Principal>) -> Self {
        self.acl.permit_groups.extend(ps);
        self
    }

    pub fn deny_groups(mut self, ps: impl IntoIterator<Item = Principal>) -> Self {
        self.acl.deny_groups.extend(ps);
        self
    }

    pub fn inherit_from(mut self, doc_id: DocId) -> Self {
        self.acl.inherit_from = Some(InheritFrom {
            doc_id,
            fragment: None,
        });
        self
    }

    pub fn inherit_from_fragment(mut self, doc_id: DocId, fragment: impl Into<String>) -> Self {
        self.acl.inherit_from = Some(InheritFrom {
            doc_id,
            fragment: Some(fragment.into()),
        });
        self
    }

    pub fn inheritance_type(mut self, ty: InheritanceType) -> Self {
        self.acl.inheritance_type = ty;
        self
    }

    pub fn case_sensitivity(mut self, case: CaseSensitivity) -> Self {
        self.acl.case_sensitivity = case;
        self
    }

    pub fn everything_case_insensitive(self) -> Self {
        self.case_sensitivity(CaseSensitivity::Insensitive)
    }

    pub fn build(self) -> Acl {
        self.acl
    }
}
