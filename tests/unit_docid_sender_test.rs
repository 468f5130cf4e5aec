use async_trait::async_trait;
use feedgate::core::FeedgateError;
use feedgate::core::acl::{Acl, Principal};
use feedgate::core::adaptor::{
    Adaptor, DocIdPusher, DocRequest, GroupDefinitions, NeverRetryExceptionHandler, Response,
};
use feedgate::core::docid::{DocId, DocIdCodec};
use feedgate::core::feed::GsaVersion;
use feedgate::core::feed::docid_sender::{DocIdSender, FeedSink};
use feedgate::core::feed::xml::GsaFeedFileMaker;
use feedgate::core::journal::{CompletionStatus, Journal};
use feedgate::core::record::Record;
use feedgate::core::time::MockTimeSource;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Debug, Clone, PartialEq)]
enum Sent {
    Feed { xml: String },
    Groups { xml: String, incremental: bool },
}

/// Records every upload; optionally fails the first `fail_first` sends.
#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<Sent>>,
    fail_first: Mutex<usize>,
}

#[async_trait]
impl FeedSink for RecordingSink {
    async fn send_metadata_and_url(
        &self,
        _datasource: &str,
        xml: &str,
    ) -> Result<(), FeedgateError> {
        let mut failures = self.fail_first.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(FeedgateError::Transient("simulated outage".to_string()));
        }
        self.sent.lock().push(Sent::Feed {
            xml: xml.to_string(),
        });
        Ok(())
    }

    async fn send_groups(
        &self,
        _source: &str,
        xml: &str,
        incremental: bool,
    ) -> Result<(), FeedgateError> {
        let mut failures = self.fail_first.lock();
        if *failures > 0 {
            *failures -= 1;
            return Err(FeedgateError::Transient("simulated outage".to_string()));
        }
        self.sent.lock().push(Sent::Groups {
            xml: xml.to_string(),
            incremental,
        });
        Ok(())
    }
}

struct Fixture {
    sink: Arc<RecordingSink>,
    journal: Arc<Journal>,
    cancel: CancellationToken,
    sender: DocIdSender,
}

fn fixture(max_urls: usize, public: bool, version: GsaVersion) -> Fixture {
    let codec = DocIdCodec::new(Url::parse("http://localhost:5678/doc/").unwrap(), false);
    let maker = GsaFeedFileMaker::new(codec, feedgate::core::acl::DomainFormat::Dns);
    let sink = Arc::new(RecordingSink::default());
    let journal = Arc::new(Journal::new(MockTimeSource::at(0), false));
    let cancel = CancellationToken::new();
    let sender = DocIdSender::new(
        maker,
        sink.clone(),
        journal.clone(),
        "testfeed".to_string(),
        max_urls,
        public,
        version,
        None,
        cancel.clone(),
    );
    Fixture {
        sink,
        journal,
        cancel,
        sender,
    }
}

fn records(ids: &[&str]) -> Vec<Record> {
    ids.iter()
        .map(|id| Record::builder(DocId::new(*id)).build())
        .collect()
}

#[tokio::test]
async fn test_records_are_split_into_batches() {
    let f = fixture(2, false, GsaVersion::default());
    let result = f
        .sender
        .push_records_with_handler(records(&["1", "2", "3", "4", "5"]), None)
        .await
        .unwrap();
    assert!(result.is_none());

    let sent = f.sink.sent.lock();
    assert_eq!(sent.len(), 3);
    assert_eq!(f.journal.get_snapshot().num_total_doc_ids_pushed, 5);
}

#[tokio::test]
async fn test_failed_batch_returns_resume_marker() {
    let f = fixture(2, false, GsaVersion::default());
    // The first send fails and the policy never retries: the first record
    // of the failed batch comes back as the resume marker.
    *f.sink.fail_first.lock() = 1;
    let result = f
        .sender
        .push_records_with_handler(records(&["1", "2", "3"]), Some(&NeverRetryExceptionHandler))
        .await
        .unwrap();
    assert_eq!(result.unwrap().doc_id(), &DocId::new("1"));
    assert!(f.sink.sent.lock().is_empty());
}

#[tokio::test]
async fn test_retry_handler_gets_second_chance() {
    struct RetryOnce;
    #[async_trait]
    impl feedgate::core::adaptor::ExceptionHandler for RetryOnce {
        async fn handle_exception(&self, _err: &FeedgateError, attempt: usize) -> bool {
            attempt < 2
        }
    }

    let f = fixture(10, false, GsaVersion::default());
    *f.sink.fail_first.lock() = 1;
    let result = f
        .sender
        .push_records_with_handler(records(&["1"]), Some(&RetryOnce))
        .await
        .unwrap();
    assert!(result.is_none());
    assert_eq!(f.sink.sent.lock().len(), 1);
}

#[tokio::test]
async fn test_cancelled_push_returns_resume_marker() {
    let f = fixture(2, false, GsaVersion::default());
    f.cancel.cancel();
    let result = f
        .sender
        .push_records_with_handler(records(&["1", "2", "3"]), None)
        .await
        .unwrap();
    assert_eq!(result.unwrap().doc_id(), &DocId::new("1"));
    assert!(f.sink.sent.lock().is_empty());
}

#[tokio::test]
async fn test_public_mode_strips_acls_from_records() {
    let f = fixture(10, true, GsaVersion::default());
    let record = Record::builder(DocId::new("1"))
        .acl(Acl::builder().permit_user(Principal::user("u")).build())
        .build();
    f.sender
        .push_records_with_handler(vec![record], None)
        .await
        .unwrap();

    let sent = f.sink.sent.lock();
    assert_eq!(sent.len(), 1);
    let Sent::Feed { xml } = &sent[0] else {
        panic!("expected a record feed");
    };
    assert!(!xml.contains("<acl"), "{xml}");
}

#[tokio::test]
async fn test_public_mode_suppresses_named_resources_and_groups() {
    let f = fixture(10, true, GsaVersion::default());
    let mut resources = BTreeMap::new();
    resources.insert(DocId::new("1"), Acl::fully_public());
    assert!(
        f.sender
            .push_named_resources_with_handler(resources, None)
            .await
            .unwrap()
            .is_none()
    );

    let mut groups = GroupDefinitions::new();
    groups.insert(Principal::group("g"), vec![Principal::user("u")]);
    assert!(
        f.sender
            .push_group_definitions_with_handler(groups, true, false, None)
            .await
            .unwrap()
            .is_none()
    );
    assert!(f.sink.sent.lock().is_empty());
}

#[tokio::test]
async fn test_group_definitions_chunked_incremental() {
    let f = fixture(2, false, GsaVersion::new(7, 2, 0, 0));
    let mut groups = GroupDefinitions::new();
    for i in 0..5 {
        groups.insert(Principal::group(format!("g{i}")), vec![]);
    }
    let result = f
        .sender
        .push_group_definitions_with_handler(groups, true, false, None)
        .await
        .unwrap();
    assert!(result.is_none());

    let sent = f.sink.sent.lock();
    assert_eq!(sent.len(), 3);
    assert!(
        sent.iter()
            .all(|s| matches!(s, Sent::Groups { incremental: true, .. }))
    );
    assert_eq!(f.journal.get_snapshot().num_total_groups_pushed, 5);
    assert_eq!(
        f.journal.get_snapshot().last_group_push_status,
        Some(CompletionStatus::Success)
    );
}

#[tokio::test]
async fn test_replace_all_uses_single_feed_on_recent_indexer() {
    let f = fixture(2, false, GsaVersion::new(7, 4, 0, 0));
    let mut groups = GroupDefinitions::new();
    for i in 0..5 {
        groups.insert(Principal::group(format!("g{i}")), vec![]);
    }
    f.sender
        .push_group_definitions_with_handler(groups, true, true, None)
        .await
        .unwrap();

    let sent = f.sink.sent.lock();
    assert_eq!(sent.len(), 1);
    assert!(matches!(
        sent[0],
        Sent::Groups {
            incremental: false,
            ..
        }
    ));
}

#[tokio::test]
async fn test_replace_all_falls_back_to_chunks_on_old_indexer() {
    let f = fixture(2, false, GsaVersion::new(7, 2, 0, 0));
    let mut groups = GroupDefinitions::new();
    for i in 0..5 {
        groups.insert(Principal::group(format!("g{i}")), vec![]);
    }
    f.sender
        .push_group_definitions_with_handler(groups, true, true, None)
        .await
        .unwrap();
    assert_eq!(f.sink.sent.lock().len(), 3);
}

struct OneShotAdaptor {
    ids: Vec<&'static str>,
}

#[async_trait]
impl Adaptor for OneShotAdaptor {
    async fn get_doc_ids(&self, pusher: &dyn DocIdPusher) -> Result<(), FeedgateError> {
        let ids = self.ids.iter().map(|id| DocId::new(*id)).collect();
        match pusher.push_doc_ids(ids).await? {
            None => Ok(()),
            Some(_) => Err(FeedgateError::Interrupted),
        }
    }

    async fn get_doc_content(
        &self,
        _request: &DocRequest,
        _response: &mut dyn Response,
    ) -> Result<(), FeedgateError> {
        unreachable!("not used in push tests")
    }
}

#[tokio::test]
async fn test_full_push_records_success_in_journal() {
    let f = fixture(10, false, GsaVersion::default());
    let adaptor = OneShotAdaptor {
        ids: vec!["a", "b"],
    };
    f.sender
        .push_full_doc_ids_from_adaptor(&adaptor, None)
        .await
        .unwrap();

    let snapshot = f.journal.get_snapshot();
    assert_eq!(snapshot.last_full_push_status, Some(CompletionStatus::Success));
    assert_eq!(snapshot.num_total_doc_ids_pushed, 2);
}

struct FailingAdaptor;

#[async_trait]
impl Adaptor for FailingAdaptor {
    async fn get_doc_ids(&self, _pusher: &dyn DocIdPusher) -> Result<(), FeedgateError> {
        Err(FeedgateError::Unavailable("repository down".to_string()))
    }

    async fn get_doc_content(
        &self,
        _request: &DocRequest,
        _response: &mut dyn Response,
    ) -> Result<(), FeedgateError> {
        unreachable!("not used in push tests")
    }
}

#[tokio::test]
async fn test_full_push_records_failure_in_journal() {
    let f = fixture(10, false, GsaVersion::default());
    let err = f
        .sender
        .push_full_doc_ids_from_adaptor(&FailingAdaptor, Some(&NeverRetryExceptionHandler))
        .await
        .unwrap_err();
    assert!(matches!(err, FeedgateError::Unavailable(_)));
    assert_eq!(
        f.journal.get_snapshot().last_full_push_status,
        Some(CompletionStatus::Failure)
    );
}
