use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::QueryError;
use crate::service::{AsyncQueryService, Query, QueryResult, QueryService, Request, ResultIterator};

/// Serves an [`AsyncQueryService`] through the iterator based [`QueryService`] interface.
pub struct QueryServiceBridge<S> {
    service: S,
}

impl<S: AsyncQueryService> QueryServiceBridge<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }

    pub fn inner(&self) -> &S {
        &self.service
    }
}

#[async_trait]
impl<S: AsyncQueryService> QueryService for QueryServiceBridge<S> {
    async fn query(
        &self,
        cancel: CancellationToken,
        request: Request,
    ) -> Result<Box<dyn ResultIterator>, QueryError> {
        let query = self.service.query(cancel, request).await?;
        Ok(Box::new(BridgeIterator {
            query,
            results: VecDeque::new(),
            fetched: false,
            done: false,
        }))
    }
}

struct BridgeIterator {
    query: Arc<dyn Query>,
    results: VecDeque<QueryResult>,
    fetched: bool,
    done: bool,
}

impl BridgeIterator {
    async fn release(&mut self) {
        if !self.done {
            self.done = true;
            self.query.done().await;
        }
    }
}

#[async_trait]
impl ResultIterator for BridgeIterator {
    async fn more(&mut self) -> bool {
        if !self.fetched {
            self.fetched = true;
            if let Some(results) = self.query.ready().await {
                self.results.extend(results.into_values());
            }
        }
        if self.results.is_empty() {
            self.release().await;
            return false;
        }
        true
    }

    fn next(&mut self) -> Option<QueryResult> {
        self.results.pop_front()
    }

    fn err(&self) -> Option<QueryError> {
        self.query.err()
    }

    fn cancel(&mut self) {
        debug!("canceling bridged query");
        self.query.cancel();
        self.results.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use parking_lot::Mutex;

    use super::*;
    use crate::service::Statistics;

    struct Fixed {
        results: Mutex<Option<BTreeMap<String, QueryResult>>>,
        err: Option<QueryError>,
        dones: Mutex<usize>,
        canceled: Mutex<bool>,
    }

    #[async_trait]
    impl Query for Fixed {
        async fn ready(&self) -> Option<BTreeMap<String, QueryResult>> {
            self.results.lock().take()
        }
        fn err(&self) -> Option<QueryError> {
            self.err.clone()
        }
        fn cancel(&self) {
            *self.canceled.lock() = true;
        }
        async fn done(&self) {
            *self.dones.lock() += 1;
        }
        fn statistics(&self) -> Statistics {
            Statistics::default()
        }
    }

    struct Service(Arc<Fixed>);

    #[async_trait]
    impl AsyncQueryService for Service {
        async fn query(
            &self,
            _cancel: CancellationToken,
            _request: Request,
        ) -> Result<Arc<dyn Query>, QueryError> {
            Ok(self.0.clone())
        }
    }

    fn fixed(names: &[&str], err: Option<QueryError>) -> Arc<Fixed> {
        let results = names
            .iter()
            .map(|n| {
                (
                    n.to_string(),
                    QueryResult {
                        name: n.to_string(),
                        tables: Vec::new(),
                    },
                )
            })
            .collect();
        Arc::new(Fixed {
            results: Mutex::new(err.is_none().then_some(results)),
            err,
            dones: Mutex::new(0),
            canceled: Mutex::new(false),
        })
    }

    #[tokio::test]
    async fn test_drains_results_in_name_order() {
        let q = fixed(&["b", "a"], None);
        let bridge = QueryServiceBridge::new(Service(q.clone()));
        let mut it = bridge
            .query(CancellationToken::new(), Request::script("org", "x"))
            .await
            .unwrap();

        let mut names = Vec::new();
        while it.more().await {
            names.push(it.next().unwrap().name);
        }
        assert_eq!(names, ["a", "b"]);
        assert!(it.err().is_none());
        assert!(!it.more().await);
        assert_eq!(*q.dones.lock(), 1);
    }

    #[tokio::test]
    async fn test_error_is_forwarded() {
        let q = fixed(&[], Some(QueryError::service("boom")));
        let bridge = QueryServiceBridge::new(Service(q.clone()));
        let mut it = bridge
            .query(CancellationToken::new(), Request::script("org", "x"))
            .await
            .unwrap();
        assert!(!it.more().await);
        assert_eq!(it.err(), Some(QueryError::service("boom")));
        assert_eq!(*q.dones.lock(), 1);
    }

    #[tokio::test]
    async fn test_cancel_reaches_query() {
        let q = fixed(&["a"], None);
        let bridge = QueryServiceBridge::new(Service(q.clone()));
        let mut it = bridge
            .query(CancellationToken::new(), Request::script("org", "x"))
            .await
            .unwrap();
        assert!(it.more().await);
        it.cancel();
        assert!(*q.canceled.lock());
        assert!(!it.more().await);
    }
}
