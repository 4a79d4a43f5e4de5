//! RBAC service
//!
//! Role and permission management plus the cached `app × user → access`
//! resolution used by the authorization guards. The cache is read-aside
//! with a short TTL; every assignment change invalidates it.

use crate::domain::{CreateRoleInput, Permission, Role, StringUuid, UserRolesInApp};
use crate::error::{AppError, Result};
use crate::kv::KvOperations;
use crate::repository::RbacRepository;
use std::sync::Arc;

pub struct RbacService {
    repo: Arc<dyn RbacRepository>,
    kv: Arc<dyn KvOperations>,
}

impl RbacService {
    pub fn new(repo: Arc<dyn RbacRepository>, kv: Arc<dyn KvOperations>) -> Self {
        Self { repo, kv }
    }

    /// Resolve a user's roles and permissions, serving from the KV cache
    /// when warm.
    pub async fn user_access(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
    ) -> Result<UserRolesInApp> {
        if let Ok(Some(cached)) = self.kv.get_user_roles(app_id, user_id).await {
            return Ok(cached);
        }

        let access = self.repo.resolve_user_access(app_id, user_id).await?;
        if let Err(e) = self.kv.set_user_roles(&access).await {
            tracing::debug!(error = %e, "Failed to cache role resolution");
        }
        Ok(access)
    }

    /// Role names for embedding into a freshly minted access token
    pub async fn role_names(&self, app_id: StringUuid, user_id: StringUuid) -> Result<Vec<String>> {
        Ok(self.user_access(app_id, user_id).await?.roles)
    }

    pub async fn create_role(&self, app_id: StringUuid, input: &CreateRoleInput) -> Result<Role> {
        self.repo.create_role(app_id, input).await
    }

    pub async fn list_roles(&self, app_id: StringUuid) -> Result<Vec<Role>> {
        self.repo.list_roles(app_id).await
    }

    pub async fn delete_role(&self, role_id: StringUuid) -> Result<()> {
        self.repo.delete_role(role_id).await
    }

    /// Seed the per-application system roles; invoked on app creation
    pub async fn seed_system_roles(&self, app_id: StringUuid) -> Result<()> {
        self.repo.seed_system_roles(app_id).await
    }

    pub async fn assign_role(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        role_id: StringUuid,
        assigned_by: Option<StringUuid>,
    ) -> Result<()> {
        self.repo
            .assign_role(app_id, user_id, role_id, assigned_by)
            .await?;
        self.invalidate(app_id, user_id).await;
        Ok(())
    }

    /// Assign a system role by name (registration gives every user `member`)
    pub async fn assign_role_by_name(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        role_name: &str,
    ) -> Result<()> {
        let role = self
            .repo
            .find_role_by_name(app_id, role_name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Role {} not found", role_name)))?;
        self.assign_role(app_id, user_id, role.id, None).await
    }

    pub async fn remove_role(
        &self,
        app_id: StringUuid,
        user_id: StringUuid,
        role_id: StringUuid,
    ) -> Result<()> {
        self.repo.remove_role(app_id, user_id, role_id).await?;
        self.invalidate(app_id, user_id).await;
        Ok(())
    }

    pub async fn list_permissions(&self) -> Result<Vec<Permission>> {
        self.repo.list_permissions().await
    }

    pub async fn create_permission(&self, resource: &str, action: &str) -> Result<Permission> {
        self.repo.create_permission(resource, action).await
    }

    pub async fn attach_permission(
        &self,
        role_id: StringUuid,
        permission_id: StringUuid,
    ) -> Result<()> {
        self.repo.attach_permission(role_id, permission_id).await
    }

    pub async fn detach_permission(
        &self,
        role_id: StringUuid,
        permission_id: StringUuid,
    ) -> Result<()> {
        self.repo.detach_permission(role_id, permission_id).await
    }

    pub async fn list_role_permissions(&self, role_id: StringUuid) -> Result<Vec<Permission>> {
        self.repo.list_role_permissions(role_id).await
    }

    async fn invalidate(&self, app_id: StringUuid, user_id: StringUuid) {
        if let Err(e) = self.kv.invalidate_user_roles(app_id, user_id).await {
            tracing::debug!(error = %e, "Failed to invalidate role cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use crate::repository::rbac::MockRbacRepository;

    fn access(app_id: StringUuid, user_id: StringUuid, roles: &[&str]) -> UserRolesInApp {
        UserRolesInApp {
            user_id,
            app_id,
            roles: roles.iter().map(|r| r.to_string()).collect(),
            permissions: vec![],
        }
    }

    #[tokio::test]
    async fn test_user_access_caches_resolution() {
        let app_id = StringUuid::new_v4();
        let user_id = StringUuid::new_v4();

        let mut repo = MockRbacRepository::new();
        // The repository is hit exactly once; the second read is cached
        repo.expect_resolve_user_access()
            .times(1)
            .returning(move |a, u| Ok(access(a, u, &["member"])));

        let svc = RbacService::new(Arc::new(repo), Arc::new(MemoryKvStore::new()));

        let first = svc.user_access(app_id, user_id).await.unwrap();
        assert_eq!(first.roles, vec!["member"]);

        let second = svc.user_access(app_id, user_id).await.unwrap();
        assert_eq!(second.roles, vec!["member"]);
    }

    #[tokio::test]
    async fn test_assignment_invalidates_cache() {
        let app_id = StringUuid::new_v4();
        let user_id = StringUuid::new_v4();
        let role_id = StringUuid::new_v4();

        let mut repo = MockRbacRepository::new();
        let mut call = 0;
        repo.expect_resolve_user_access()
            .times(2)
            .returning(move |a, u| {
                call += 1;
                if call == 1 {
                    Ok(access(a, u, &["member"]))
                } else {
                    Ok(access(a, u, &["member", "admin"]))
                }
            });
        repo.expect_assign_role().times(1).returning(|_, _, _, _| Ok(()));

        let svc = RbacService::new(Arc::new(repo), Arc::new(MemoryKvStore::new()));

        assert_eq!(svc.user_access(app_id, user_id).await.unwrap().roles, vec!["member"]);

        svc.assign_role(app_id, user_id, role_id, None).await.unwrap();

        // Cache was invalidated, so the new role shows up
        assert_eq!(
            svc.user_access(app_id, user_id).await.unwrap().roles,
            vec!["member", "admin"]
        );
    }

    #[tokio::test]
    async fn test_assign_role_by_name_missing_role() {
        let mut repo = MockRbacRepository::new();
        repo.expect_find_role_by_name().returning(|_, _| Ok(None));

        let svc = RbacService::new(Arc::new(repo), Arc::new(MemoryKvStore::new()));
        let result = svc
            .assign_role_by_name(StringUuid::new_v4(), StringUuid::new_v4(), "ghost")
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
