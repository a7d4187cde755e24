//! Directory identities and the rules that turn them into local accounts.

mod keys;
mod models;
mod username;

use std::collections::HashSet;
use std::hash::Hash;

pub use keys::KeyPattern;
pub use models::{AccountState, DIRECTORY_FIELDS, DirectoryUser, KeyBlob, ManagedAccount};
pub use username::derive_username;

/// Drop duplicates (first occurrence wins) and sort the survivors.
///
/// The sort is stable, so elements with equal sort keys keep input order.
pub fn sort_unique<T, U, S>(
    items: Vec<T>,
    unique_key: impl Fn(&T) -> U,
    sort_key: impl Fn(&T) -> S,
) -> Vec<T>
where
    U: Eq + Hash,
    S: Ord,
{
    let mut seen = HashSet::new();
    let mut unique: Vec<T> = items
        .into_iter()
        .filter(|item| seen.insert(unique_key(item)))
        .collect();
    unique.sort_by_key(|item| sort_key(item));
    unique
}

/// Directory users in processing order: unique by id, sorted by mail.
pub fn sort_users_unique(users: Vec<DirectoryUser>) -> Vec<DirectoryUser> {
    sort_unique(users, |u| u.id.clone(), |u| u.mail.clone())
}
