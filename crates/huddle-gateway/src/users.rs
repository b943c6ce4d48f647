use std::sync::Arc;

use chrono::Utc;

use huddle_types::models::{User, UserId};

use crate::error::ChatError;
use crate::sanitize::strip_markup;
use crate::store::ChatStore;

const MAX_SEARCH_RESULTS: u32 = 50;

/// User directory lookups and profile updates.
pub struct UserService<S> {
    store: Arc<S>,
}

impl<S> Clone for UserService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: ChatStore> UserService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn find(&self, id: UserId) -> Result<User, ChatError> {
        self.store.find_user(id)?.ok_or(ChatError::NotFound("user"))
    }

    pub fn find_by_username(&self, username: &str) -> Result<User, ChatError> {
        self.store
            .find_user_by_username(username)?
            .ok_or(ChatError::NotFound("user"))
    }

    pub fn find_by_email(&self, email: &str) -> Result<User, ChatError> {
        self.store
            .find_user_by_email(email)?
            .ok_or(ChatError::NotFound("user"))
    }

    /// Users whose username or email contains `query`, for starting DMs.
    /// The caller is left out of the results.
    pub fn search(&self, query: &str, limit: u32, exclude: UserId) -> Result<Vec<User>, ChatError> {
        if query.trim().is_empty() {
            return Ok(vec![]);
        }
        let limit = limit.min(MAX_SEARCH_RESULTS);
        Ok(self
            .store
            .search_users(query, limit)?
            .into_iter()
            .filter(|u| u.id != exclude)
            .collect())
    }

    /// A blank URL clears the avatar.
    pub fn update_avatar(&self, user_id: UserId, avatar_url: &str) -> Result<(), ChatError> {
        let avatar = strip_markup(avatar_url);
        self.store.update_avatar(user_id, avatar.as_deref())?;
        Ok(())
    }

    pub fn set_online(&self, user_id: UserId, online: bool) -> Result<(), ChatError> {
        self.store.set_online(user_id, online, Utc::now())?;
        Ok(())
    }
}
