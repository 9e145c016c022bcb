//! Role-based permission evaluation.

use std::time::Duration;

use tracing::{debug, instrument, trace};

use crate::{
    api::models::users::Identity,
    auth::stores::{RoleGrantStore, with_deadline},
    errors::Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// Decides whether an identity may call a (route pattern, method) pair.
///
/// The policy is a logical OR across the identity's roles. Roles are queried in stored order
/// and evaluation stops at the first grant; a role without a grant does not stop it. An
/// identity with no roles is denied unless it is a super-admin.
pub struct PermissionEvaluator<'a> {
    grants: &'a dyn RoleGrantStore,
    store_timeout: Duration,
}

impl<'a> PermissionEvaluator<'a> {
    pub fn new(grants: &'a dyn RoleGrantStore, store_timeout: Duration) -> Self {
        Self { grants, store_timeout }
    }

    /// A store failure on any role ends evaluation with `Err`; callers must treat it as a
    /// denial.
    #[instrument(skip(self, identity), fields(user_id = identity.user_id))]
    pub async fn evaluate(&self, identity: &Identity, path: &str, method: &str) -> Result<Decision> {
        if identity.is_super_admin {
            trace!("Super-admin bypasses permission checks");
            return Ok(Decision::Allow);
        }

        for &role_id in &identity.role_ids {
            let granted = with_deadline(self.store_timeout, "check role grant", self.grants.check(role_id, path, method)).await?;
            if granted {
                debug!("Role {} grants {} {}", role_id, method, path);
                return Ok(Decision::Allow);
            }
        }

        debug!("No role of user {} grants {} {}", identity.user_id, method, path);
        Ok(Decision::Deny)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{CountingGrantStore, test_identity};

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_short_circuits_on_first_grant() {
        let grants = CountingGrantStore::new(&[(3, false), (5, false), (7, true), (9, true)]);
        let evaluator = PermissionEvaluator::new(&grants, TIMEOUT);

        let identity = test_identity(1, &[3, 5, 7, 9], false);
        let decision = evaluator.evaluate(&identity, "/user/list", "GET").await.unwrap();

        assert_eq!(decision, Decision::Allow);
        assert_eq!(grants.queries(), vec![3, 5, 7]);
    }

    #[tokio::test]
    async fn test_three_roles_last_grants() {
        let grants = CountingGrantStore::new(&[(3, false), (5, false), (7, true)]);
        let evaluator = PermissionEvaluator::new(&grants, TIMEOUT);

        let decision = evaluator.evaluate(&test_identity(1, &[3, 5, 7], false), "/article", "POST").await.unwrap();
        assert_eq!(decision, Decision::Allow);
        assert_eq!(grants.query_count(), 3);
    }

    #[tokio::test]
    async fn test_empty_roles_are_denied() {
        let grants = CountingGrantStore::new(&[]);
        let evaluator = PermissionEvaluator::new(&grants, TIMEOUT);
        let identity = test_identity(1, &[], false);

        for (path, method) in [("/user/list", "GET"), ("/article", "POST"), ("/", "DELETE")] {
            assert_eq!(evaluator.evaluate(&identity, path, method).await.unwrap(), Decision::Deny);
        }
        assert_eq!(grants.query_count(), 0);
    }

    #[tokio::test]
    async fn test_no_granting_role_is_denied() {
        let grants = CountingGrantStore::new(&[(1, false), (2, false)]);
        let evaluator = PermissionEvaluator::new(&grants, TIMEOUT);

        let decision = evaluator.evaluate(&test_identity(1, &[1, 2], false), "/tag", "DELETE").await.unwrap();
        assert_eq!(decision, Decision::Deny);
        assert_eq!(grants.query_count(), 2);
    }

    #[tokio::test]
    async fn test_super_admin_bypasses_without_roles() {
        let grants = CountingGrantStore::new(&[]);
        let evaluator = PermissionEvaluator::new(&grants, TIMEOUT);

        let decision = evaluator.evaluate(&test_identity(1, &[], true), "/user/list", "GET").await.unwrap();
        assert_eq!(decision, Decision::Allow);
        assert_eq!(grants.query_count(), 0);
    }

    #[tokio::test]
    async fn test_store_error_stops_evaluation() {
        let grants = CountingGrantStore::new(&[(1, false), (3, true)]).failing_on(2);
        let evaluator = PermissionEvaluator::new(&grants, TIMEOUT);

        let error = evaluator.evaluate(&test_identity(1, &[1, 2, 3], false), "/user/list", "GET").await.unwrap_err();
        assert!(error.is_store_error());
        assert_eq!(grants.queries(), vec![1, 2]);
    }
}
