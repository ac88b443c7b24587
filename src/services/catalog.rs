//! Catalog management service

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::book::{normalize_isbn, Book, BookQuery, CreateBook, UpdateBook},
    repository::CirculationStore,
};

fn book_not_found() -> AppError {
    AppError::NotFound("Book not found".to_string())
}

fn isbn_taken() -> AppError {
    AppError::Conflict("Book with this ISBN already exists".to_string())
}

#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn CirculationStore>,
}

impl CatalogService {
    pub fn new(store: Arc<dyn CirculationStore>) -> Self {
        Self { store }
    }

    /// Search books with filters
    pub async fn search_books(&self, query: &BookQuery) -> AppResult<(Vec<Book>, i64)> {
        self.store.list_books(query).await
    }

    pub async fn get_book(&self, id: Uuid) -> AppResult<Book> {
        self.store.get_book(id).await?.ok_or_else(book_not_found)
    }

    /// Add a title to the catalog. All copies start on the shelf.
    pub async fn create_book(&self, request: CreateBook) -> AppResult<Book> {
        let isbn = normalize_isbn(&request.isbn);
        if self.store.find_book_by_isbn(&isbn).await?.is_some() {
            return Err(isbn_taken());
        }

        let now = Utc::now();
        let quantity = request.quantity.unwrap_or(1);
        let book = Book {
            id: Uuid::new_v4(),
            isbn,
            title: request.title.trim().to_string(),
            author: request.author.trim().to_string(),
            published_year: request.published_year,
            genre: request.genre,
            description: request.description,
            shelf: request.shelf,
            section: request.section,
            quantity,
            available_quantity: quantity,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_book(&book).await?;

        tracing::info!("Book {} created ({}, {} copies)", book.id, book.isbn, book.quantity);
        Ok(book)
    }

    /// Update descriptive fields. A new `quantity` moves the shelf count by the
    /// same delta; the write only lands if no checkout or return happened since
    /// the book was read.
    pub async fn update_book(&self, id: Uuid, request: UpdateBook) -> AppResult<Book> {
        let mut book = self.get_book(id).await?;
        let expected_available = book.available_quantity;

        if let Some(ref isbn) = request.isbn {
            let isbn = normalize_isbn(isbn);
            if let Some(other) = self.store.find_book_by_isbn(&isbn).await? {
                if other.id != id {
                    return Err(isbn_taken());
                }
            }
        }

        if let Some(quantity) = request.quantity {
            if !book.set_quantity(quantity) {
                return Err(AppError::validation(format!(
                    "quantity cannot be lower than the {} copies on loan",
                    book.copies_on_loan()
                )));
            }
        }
        request.apply(&mut book);

        match self.store.update_book(&book, expected_available).await? {
            Some(updated) => {
                tracing::info!("Book {} updated", updated.id);
                Ok(updated)
            }
            None => {
                tracing::warn!("Update of book {} lost a race with circulation", id);
                Err(AppError::Conflict(
                    "Book availability changed during the update, please retry".to_string(),
                ))
            }
        }
    }

    /// Remove a title. Refused while any copy is on loan.
    pub async fn delete_book(&self, id: Uuid) -> AppResult<()> {
        let book = self.get_book(id).await?;
        if book.copies_on_loan() > 0 || !self.store.delete_book(id).await? {
            return Err(AppError::Conflict(
                "Cannot delete a book while copies are on loan".to_string(),
            ));
        }
        tracing::info!("Book {} deleted", id);
        Ok(())
    }
}
