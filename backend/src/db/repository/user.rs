//! User account operations.

use async_trait::async_trait;

use super::RepositoryResult;
use crate::models::{NewUser, User, UserId};

/// Account storage. Users are created by administrators or seeding and are
/// never modified by the reconciler.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a new user.
    ///
    /// # Returns
    /// * `Ok(User)` - The stored user with its assigned id
    /// * `Err(RepositoryError::ValidationError)` - If the username is taken
    async fn create_user(&self, user: &NewUser) -> RepositoryResult<User>;

    /// Get a user by id, or `NotFound`.
    async fn get_user(&self, user_id: UserId) -> RepositoryResult<User>;

    /// Look up a user by username.
    async fn find_user_by_username(&self, username: &str) -> RepositoryResult<Option<User>>;

    /// Plaintext credential match: username and password must both be equal.
    async fn find_user_by_credentials(
        &self,
        username: &str,
        password: &str,
    ) -> RepositoryResult<Option<User>>;

    async fn list_users(&self) -> RepositoryResult<Vec<User>>;
}
