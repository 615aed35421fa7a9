mod seed;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    models::{CategoryEntity, CoupleEntity, QuestionEntity, UserEntity},
    storage::StorageResult,
};

pub use seed::{CatalogSeed, SeedCategory, SeedQuestion, StaticCatalog, demo};

/// Identity and partner-linking collaborator.
pub trait Directory: Send + Sync {
    /// Resolve an opaque bearer credential to a user id.
    fn resolve_token(&self, token: String) -> BoxFuture<'static, StorageResult<Option<Uuid>>>;
    /// Look up a user profile.
    fn find_user(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<UserEntity>>>;
    /// Look up the couple a user belongs to.
    fn find_couple_for_user(
        &self,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<CoupleEntity>>>;
}

/// Read-only category and question content.
pub trait QuestionBank: Send + Sync {
    /// Category metadata.
    fn find_category(&self, id: i64) -> BoxFuture<'static, StorageResult<Option<CategoryEntity>>>;
    /// Every question of a category.
    fn questions_for_category(
        &self,
        category_id: i64,
    ) -> BoxFuture<'static, StorageResult<Vec<QuestionEntity>>>;
    /// Point lookup of a question.
    fn find_question(&self, id: i64) -> BoxFuture<'static, StorageResult<Option<QuestionEntity>>>;
}
