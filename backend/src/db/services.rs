//! Store-level helpers used by the repository factory and the HTTP layer.

use tracing::{debug, info};

use super::repository::{FullRepository, RepositoryResult};
use crate::models::NewUser;

/// Check that the store is reachable.
pub async fn health_check(repo: &dyn FullRepository) -> RepositoryResult<bool> {
    repo.health_check().await
}

/// Create every seed account whose username does not exist yet.
///
/// Returns the number of accounts created.
pub async fn seed_users(repo: &dyn FullRepository, users: &[NewUser]) -> RepositoryResult<usize> {
    let mut created = 0;
    for user in users {
        if repo.find_user_by_username(&user.username).await?.is_some() {
            debug!(username = %user.username, "seed user already present");
            continue;
        }
        let stored = repo.create_user(user).await?;
        info!(user_id = %stored.id, username = %stored.username, role = %stored.role, "seeded user");
        created += 1;
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::LocalRepository;
    use crate::db::repository::UserRepository;
    use crate::models::Role;

    #[tokio::test]
    async fn test_seed_users_is_idempotent() {
        let repo = LocalRepository::new();
        let seeds = vec![
            NewUser::new("admin", "secret", Role::Admin),
            NewUser::new("qa_iyer", "pw", Role::Qa),
        ];

        assert_eq!(seed_users(&repo, &seeds).await.unwrap(), 2);
        assert_eq!(seed_users(&repo, &seeds).await.unwrap(), 0);
        assert_eq!(repo.list_users().await.unwrap().len(), 2);
    }
}
