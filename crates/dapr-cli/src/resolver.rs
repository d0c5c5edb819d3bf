//! Locate the namespace hosting the dashboard.
//!
//! Candidates are checked in order and the first namespace with a running
//! pod wins. A failed query counts as "not here" so one unreachable
//! namespace does not abort the search.

use tracing::{debug, warn};

use crate::cluster::ClusterClient;

/// Where the service was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub namespace: String,
    /// Running pod that matched, reused by the session so the namespace is
    /// not listed a second time.
    pub pod: String,
}

/// Return the first namespace in `candidates` that hosts a running pod for `service_name`.
pub async fn resolve_namespace(
    cluster: &dyn ClusterClient,
    candidates: &[String],
    service_name: &str,
) -> Option<Resolved> {
    for namespace in candidates {
        if let Some(pod) = running_pod(cluster, namespace, service_name).await {
            debug!(namespace = %namespace, service = %service_name, pod = %pod, "Found service");
            return Some(Resolved {
                namespace: namespace.clone(),
                pod,
            });
        }
        debug!(namespace = %namespace, service = %service_name, "Service not found");
    }
    None
}

/// Query errors are reported as no pod.
async fn running_pod(
    cluster: &dyn ClusterClient,
    namespace: &str,
    service_name: &str,
) -> Option<String> {
    match cluster.find_running_pod(namespace, service_name).await {
        Ok(pod) => pod,
        Err(e) => {
            warn!(
                namespace = %namespace,
                service = %service_name,
                error = %e,
                "Could not check for service, treating namespace as empty"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterClient;
    use crate::Error;
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn candidates(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn namespace_of(found: Option<Resolved>) -> Option<String> {
        found.map(|r| r.namespace)
    }

    #[tokio::test]
    async fn first_match_wins_and_short_circuits() {
        let mut mock = MockClusterClient::new();
        let mut seq = Sequence::new();
        mock.expect_find_running_pod()
            .with(eq("a"), eq("svc"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(None));
        mock.expect_find_running_pod()
            .with(eq("b"), eq("svc"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Some("svc-1".to_string())));
        // "c" also hosts the service but must never be queried
        mock.expect_find_running_pod()
            .with(eq("c"), eq("svc"))
            .never();

        let found = resolve_namespace(&mock, &candidates(&["a", "b", "c"]), "svc").await;
        assert_eq!(
            found,
            Some(Resolved {
                namespace: "b".to_string(),
                pod: "svc-1".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn interleaved_fixtures_pick_first_true() {
        let hosts = ["x", "z"];
        let mut mock = MockClusterClient::new();
        mock.expect_find_running_pod().returning(move |ns, _| {
            Ok(hosts
                .iter()
                .any(|h| *h == ns)
                .then(|| format!("svc-{}", ns)))
        });

        let order = candidates(&["w", "x", "y", "z"]);
        assert_eq!(
            namespace_of(resolve_namespace(&mock, &order, "svc").await).as_deref(),
            Some("x")
        );

        let order = candidates(&["y", "z", "x"]);
        assert_eq!(
            namespace_of(resolve_namespace(&mock, &order, "svc").await).as_deref(),
            Some("z")
        );
    }

    #[tokio::test]
    async fn empty_candidates_issue_no_query() {
        let mut mock = MockClusterClient::new();
        mock.expect_find_running_pod().never();

        assert!(resolve_namespace(&mock, &[], "svc").await.is_none());
    }

    #[tokio::test]
    async fn query_error_falls_through_to_next_candidate() {
        let mut mock = MockClusterClient::new();
        mock.expect_find_running_pod()
            .with(eq("dapr-system"), eq("dapr-dashboard"))
            .returning(|_, _| Err(Error::command_failed("forbidden")));
        mock.expect_find_running_pod()
            .with(eq("default"), eq("dapr-dashboard"))
            .returning(|_, _| Ok(Some("dapr-dashboard-abc".to_string())));

        let found = resolve_namespace(
            &mock,
            &candidates(&["dapr-system", "default"]),
            "dapr-dashboard",
        )
        .await
        .expect("found in default");
        assert_eq!(found.namespace, "default");
        assert_eq!(found.pod, "dapr-dashboard-abc");
    }

    #[tokio::test]
    async fn no_match_anywhere_returns_none() {
        let mut mock = MockClusterClient::new();
        mock.expect_find_running_pod()
            .times(2)
            .returning(|_, _| Ok(None));

        let found = resolve_namespace(
            &mock,
            &candidates(&["dapr-system", "default"]),
            "dapr-dashboard",
        )
        .await;
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn duplicate_candidates_are_checked_as_given() {
        let mut mock = MockClusterClient::new();
        mock.expect_find_running_pod()
            .with(eq("ops"), eq("svc"))
            .times(2)
            .returning(|_, _| Ok(None));

        assert!(resolve_namespace(&mock, &candidates(&["ops", "ops"]), "svc")
            .await
            .is_none());
    }
}
