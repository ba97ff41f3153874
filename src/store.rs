use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use thiserror::Error;
use uuid::Uuid;

use crate::artifact::FinalArtifact;
use crate::models::{Book, BookStatus};

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("book {0} not found")]
    NotFound(Uuid),
    #[error("book {id} cannot move from {from} to {to}")]
    InvalidTransition { id: Uuid, from: BookStatus, to: BookStatus },
}

#[async_trait]
pub trait BookStore: Send + Sync {
    async fn create(&self, book: Book) -> Result<Book, StoreError>;
    async fn get(&self, id: Uuid) -> Result<Option<Book>, StoreError>;
    async fn list(&self) -> Result<Vec<Book>, StoreError>;
    /// Checks the current status, applies `to` (and `content` when given) and
    /// bumps `updated_at` in one step.
    async fn transition(
        &self,
        id: Uuid,
        to: BookStatus,
        content: Option<FinalArtifact>,
    ) -> Result<Book, StoreError>;
}

#[derive(Default)]
pub struct InMemoryBookStore {
    books: RwLock<HashMap<Uuid, Book>>,
}

impl InMemoryBookStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookStore for InMemoryBookStore {
    async fn create(&self, book: Book) -> Result<Book, StoreError> {
        self.books.write().insert(book.id, book.clone());
        Ok(book)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Book>, StoreError> {
        Ok(self.books.read().get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Book>, StoreError> {
        let mut books: Vec<Book> = self.books.read().values().cloned().collect();
        books.sort_by_key(|b| b.created_at);
        Ok(books)
    }

    async fn transition(
        &self,
        id: Uuid,
        to: BookStatus,
        content: Option<FinalArtifact>,
    ) -> Result<Book, StoreError> {
        let mut guard = self.books.write();
        let book = guard.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if !book.status.can_transition_to(to) {
            return Err(StoreError::InvalidTransition { id, from: book.status, to });
        }
        book.status = to;
        if content.is_some() {
            book.content = content;
        }
        book.updated_at = Utc::now();
        Ok(book.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sample_request;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn transition_reads_back_immediately() {
        let store = InMemoryBookStore::new();
        let book = store.create(Book::new(sample_request())).await.unwrap();

        let updated = store.transition(book.id, BookStatus::Generating, None).await.unwrap();
        assert_eq!(updated.status, BookStatus::Generating);
        assert!(updated.updated_at >= book.updated_at);

        let read = store.get(book.id).await.unwrap().unwrap();
        assert_eq!(read.status, BookStatus::Generating);
    }

    #[tokio::test]
    async fn rejects_transitions_out_of_terminal_states() {
        let store = InMemoryBookStore::new();
        let book = store.create(Book::new(sample_request())).await.unwrap();
        store.transition(book.id, BookStatus::Generating, None).await.unwrap();
        store.transition(book.id, BookStatus::Failed, None).await.unwrap();

        let err = store.transition(book.id, BookStatus::Completed, None).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::InvalidTransition { id: book.id, from: BookStatus::Failed, to: BookStatus::Completed }
        );
    }

    #[tokio::test]
    async fn missing_book_is_not_found() {
        let store = InMemoryBookStore::new();
        let id = Uuid::new_v4();
        assert_eq!(store.get(id).await.unwrap().map(|b| b.id), None);
        assert_eq!(
            store.transition(id, BookStatus::Generating, None).await.unwrap_err(),
            StoreError::NotFound(id)
        );
    }

    #[tokio::test]
    async fn list_is_ordered_by_creation() {
        let store = InMemoryBookStore::new();
        let first = store.create(Book::new(sample_request())).await.unwrap();
        let mut later = Book::new(sample_request());
        later.created_at = first.created_at + chrono::Duration::seconds(1);
        let second = store.create(later).await.unwrap();

        let ids: Vec<Uuid> = store.list().await.unwrap().into_iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }
}
