use std::{collections::HashMap, fs, io::ErrorKind, path::Path, sync::Arc};

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::{Directory, QuestionBank};
use crate::dao::{
    models::{CategoryEntity, CoupleEntity, QuestionEntity, UserEntity},
    storage::StorageResult,
};

/// JSON document describing users, couples and question content.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogSeed {
    /// Registered players.
    #[serde(default)]
    pub users: Vec<UserEntity>,
    /// Linked pairs of players.
    #[serde(default)]
    pub couples: Vec<CoupleEntity>,
    /// Categories together with their questions.
    #[serde(default)]
    pub categories: Vec<SeedCategory>,
}

/// Category entry of a [`CatalogSeed`].
#[derive(Debug, Clone, Deserialize)]
pub struct SeedCategory {
    /// Stable identifier.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Short description.
    #[serde(default)]
    pub description: String,
    /// Whether the category holds intimate questions.
    #[serde(default)]
    pub sensitive: bool,
    /// Questions of the category.
    #[serde(default)]
    pub questions: Vec<SeedQuestion>,
}

/// Question entry of a [`SeedCategory`].
#[derive(Debug, Clone, Deserialize)]
pub struct SeedQuestion {
    /// Stable identifier, unique across categories.
    pub id: i64,
    /// Question text.
    pub text: String,
    /// Options `A` to `D`.
    pub options: [String; 4],
}

/// In-process [`Directory`] and [`QuestionBank`] built from a [`CatalogSeed`].
#[derive(Clone)]
pub struct StaticCatalog {
    inner: Arc<CatalogIndex>,
}

struct CatalogIndex {
    users: HashMap<Uuid, UserEntity>,
    tokens: HashMap<String, Uuid>,
    couples: Vec<CoupleEntity>,
    categories: HashMap<i64, CategoryEntity>,
    questions: HashMap<i64, QuestionEntity>,
}

impl StaticCatalog {
    /// Index a seed document.
    pub fn from_seed(seed: CatalogSeed) -> Self {
        let tokens = seed
            .users
            .iter()
            .filter_map(|user| user.token.clone().map(|token| (token, user.id)))
            .collect();
        let users = seed.users.into_iter().map(|user| (user.id, user)).collect();

        let mut categories = HashMap::new();
        let mut questions = HashMap::new();
        for category in seed.categories {
            for question in category.questions {
                let [option_a, option_b, option_c, option_d] = question.options;
                questions.insert(
                    question.id,
                    QuestionEntity {
                        id: question.id,
                        category_id: category.id,
                        text: question.text,
                        option_a,
                        option_b,
                        option_c,
                        option_d,
                    },
                );
            }
            categories.insert(
                category.id,
                CategoryEntity {
                    id: category.id,
                    name: category.name,
                    description: category.description,
                    sensitive: category.sensitive,
                },
            );
        }

        Self {
            inner: Arc::new(CatalogIndex {
                users,
                tokens,
                couples: seed.couples,
                categories,
                questions,
            }),
        }
    }

    /// Load the seed at `path`, falling back to the built-in demo content.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            info!("no catalog seed configured; using built-in demo content");
            return Self::from_seed(demo_seed());
        };

        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<CatalogSeed>(&contents) {
                Ok(seed) => {
                    info!(
                        path = %path.display(),
                        users = seed.users.len(),
                        categories = seed.categories.len(),
                        "loaded catalog seed"
                    );
                    Self::from_seed(seed)
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse catalog seed; falling back to demo content"
                    );
                    Self::from_seed(demo_seed())
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(path = %path.display(), "catalog seed not found; using demo content");
                Self::from_seed(demo_seed())
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read catalog seed; falling back to demo content"
                );
                Self::from_seed(demo_seed())
            }
        }
    }

    /// Push tokens registered for a user.
    pub fn push_tokens(&self, user_id: Uuid) -> Vec<String> {
        self.inner
            .users
            .get(&user_id)
            .map(|user| user.push_tokens.clone())
            .unwrap_or_default()
    }
}

impl Directory for StaticCatalog {
    fn resolve_token(&self, token: String) -> BoxFuture<'static, StorageResult<Option<Uuid>>> {
        let catalog = self.clone();
        Box::pin(async move { Ok(catalog.inner.tokens.get(&token).copied()) })
    }

    fn find_user(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        let catalog = self.clone();
        Box::pin(async move { Ok(catalog.inner.users.get(&id).cloned()) })
    }

    fn find_couple_for_user(
        &self,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<CoupleEntity>>> {
        let catalog = self.clone();
        Box::pin(async move {
            Ok(catalog
                .inner
                .couples
                .iter()
                .find(|couple| couple.contains(user_id))
                .cloned())
        })
    }
}

impl QuestionBank for StaticCatalog {
    fn find_category(&self, id: i64) -> BoxFuture<'static, StorageResult<Option<CategoryEntity>>> {
        let catalog = self.clone();
        Box::pin(async move { Ok(catalog.inner.categories.get(&id).cloned()) })
    }

    fn questions_for_category(
        &self,
        category_id: i64,
    ) -> BoxFuture<'static, StorageResult<Vec<QuestionEntity>>> {
        let catalog = self.clone();
        Box::pin(async move {
            let mut questions: Vec<QuestionEntity> = catalog
                .inner
                .questions
                .values()
                .filter(|question| question.category_id == category_id)
                .cloned()
                .collect();
            questions.sort_by_key(|question| question.id);
            Ok(questions)
        })
    }

    fn find_question(&self, id: i64) -> BoxFuture<'static, StorageResult<Option<QuestionEntity>>> {
        let catalog = self.clone();
        Box::pin(async move { Ok(catalog.inner.questions.get(&id).cloned()) })
    }
}

/// Identifiers of the built-in demo users, couple and category.
pub mod demo {
    use uuid::Uuid;

    /// First demo player.
    pub const ALEX: Uuid = Uuid::from_u128(0x0000_0001_0000_4000_8000_0000_0000_0001);
    /// Second demo player, partner of [`ALEX`].
    pub const SAM: Uuid = Uuid::from_u128(0x0000_0001_0000_4000_8000_0000_0000_0002);
    /// Player without a partner.
    pub const JORDAN: Uuid = Uuid::from_u128(0x0000_0001_0000_4000_8000_0000_0000_0003);
    /// Couple linking [`ALEX`] and [`SAM`].
    pub const COUPLE: Uuid = Uuid::from_u128(0x0000_0002_0000_4000_8000_0000_0000_0001);
    /// Category with enough questions for a game.
    pub const CATEGORY: i64 = 1;
    /// Category with too few questions.
    pub const SMALL_CATEGORY: i64 = 2;
}

fn demo_seed() -> CatalogSeed {
    let user = |id: Uuid, name: &str, token: &str| UserEntity {
        id,
        name: name.to_owned(),
        token: Some(token.to_owned()),
        push_tokens: Vec::new(),
    };

    let prompts = [
        "What is my favourite way to spend a Sunday?",
        "Which cuisine would I pick for a date night?",
        "What would I do with an unexpected day off?",
        "Which holiday destination tempts me most?",
        "What is my go-to comfort movie genre?",
        "How do I prefer to celebrate my birthday?",
        "Which chore do I dislike the most?",
        "What kind of music do I play in the car?",
        "What is my ideal morning drink?",
        "Which superpower would I choose?",
    ];
    let questions = prompts
        .iter()
        .enumerate()
        .map(|(index, text)| SeedQuestion {
            id: 101 + index as i64,
            text: (*text).to_owned(),
            options: [
                "Option A".to_owned(),
                "Option B".to_owned(),
                "Option C".to_owned(),
                "Option D".to_owned(),
            ],
        })
        .collect();

    CatalogSeed {
        users: vec![
            user(demo::ALEX, "Alex", "alex-token"),
            user(demo::SAM, "Sam", "sam-token"),
            user(demo::JORDAN, "Jordan", "jordan-token"),
        ],
        couples: vec![CoupleEntity {
            id: demo::COUPLE,
            user1_id: demo::ALEX,
            user2_id: demo::SAM,
        }],
        categories: vec![
            SeedCategory {
                id: demo::CATEGORY,
                name: "Getting to know you".to_owned(),
                description: "Everyday habits and small preferences.".to_owned(),
                sensitive: false,
                questions,
            },
            SeedCategory {
                id: demo::SMALL_CATEGORY,
                name: "Deep cuts".to_owned(),
                description: "Not enough questions yet.".to_owned(),
                sensitive: true,
                questions: vec![SeedQuestion {
                    id: 201,
                    text: "What scares me the most?".to_owned(),
                    options: [
                        "Heights".to_owned(),
                        "Spiders".to_owned(),
                        "Crowds".to_owned(),
                        "Silence".to_owned(),
                    ],
                }],
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_seed_links_alex_and_sam() {
        let catalog = StaticCatalog::load(None);

        let alex = catalog
            .resolve_token("alex-token".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alex, demo::ALEX);

        let couple = catalog.find_couple_for_user(alex).await.unwrap().unwrap();
        assert_eq!(couple.partner_of(alex), demo::SAM);
        assert!(
            catalog
                .find_couple_for_user(demo::JORDAN)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn questions_are_indexed_per_category() {
        let catalog = StaticCatalog::load(None);
        let questions = catalog.questions_for_category(demo::CATEGORY).await.unwrap();
        assert_eq!(questions.len(), 10);
        assert!(questions.iter().all(|q| q.category_id == demo::CATEGORY));

        let small = catalog
            .questions_for_category(demo::SMALL_CATEGORY)
            .await
            .unwrap();
        assert_eq!(small.len(), 1);
        assert_eq!(small[0].option_b, "Spiders");
    }

    #[test]
    fn seed_parses_from_json() {
        let json = r#"{
            "users": [{"id": "6b0c8f4e-37f4-4d1e-9a66-3d4e08c2f001", "name": "Kim", "token": "kim", "push_tokens": ["ExponentPushToken[x]"]}],
            "categories": [{"id": 9, "name": "Food", "questions": [{"id": 1, "text": "Pizza?", "options": ["a", "b", "c", "d"]}]}]
        }"#;
        let seed: CatalogSeed = serde_json::from_str(json).unwrap();
        let catalog = StaticCatalog::from_seed(seed);
        let kim = Uuid::parse_str("6b0c8f4e-37f4-4d1e-9a66-3d4e08c2f001").unwrap();
        assert_eq!(catalog.push_tokens(kim), vec!["ExponentPushToken[x]".to_owned()]);
    }
}
