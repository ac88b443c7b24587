//! Book (inventory unit) model and related types

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::{Validate, ValidationError};

static ISBN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{9}[\dX]|\d{13})$").unwrap());

/// Strip separators from an ISBN and upper-case the check digit
pub fn normalize_isbn(isbn: &str) -> String {
    isbn.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect::<String>()
        .to_uppercase()
}

pub fn validate_isbn(isbn: &str) -> Result<(), ValidationError> {
    if ISBN_RE.is_match(&normalize_isbn(isbn)) {
        Ok(())
    } else {
        let mut err = ValidationError::new("isbn");
        err.message = Some("ISBN must have 10 or 13 digits".into());
        Err(err)
    }
}

/// Book title with its copy counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: Uuid,
    pub isbn: String,
    pub title: String,
    pub author: String,
    pub published_year: Option<i32>,
    pub genre: Option<String>,
    pub description: Option<String>,
    pub shelf: Option<String>,
    pub section: Option<String>,
    /// Copies owned by the library
    pub quantity: i32,
    /// Copies on the shelf
    pub available_quantity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Book {
    pub fn is_available(&self) -> bool {
        self.available_quantity > 0
    }

    pub fn copies_on_loan(&self) -> i32 {
        self.quantity - self.available_quantity
    }

    /// Take a copy off the shelf. False when none is left.
    pub fn reserve_copy(&mut self) -> bool {
        if self.available_quantity <= 0 {
            return false;
        }
        self.available_quantity -= 1;
        true
    }

    /// Put a loaned copy back on the shelf. False if every copy is already there.
    pub fn release_copy(&mut self) -> bool {
        if self.available_quantity >= self.quantity {
            return false;
        }
        self.available_quantity += 1;
        true
    }

    /// Remove a loaned copy from the collection for good.
    pub fn retire_copy(&mut self) -> bool {
        if self.copies_on_loan() <= 0 {
            return false;
        }
        self.quantity -= 1;
        true
    }

    /// Change the owned quantity, moving the shelf count by the same delta.
    pub fn set_quantity(&mut self, quantity: i32) -> bool {
        let available = self.available_quantity + (quantity - self.quantity);
        if quantity < 0 || available < 0 {
            return false;
        }
        self.quantity = quantity;
        self.available_quantity = available;
        true
    }
}

/// Create book request
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateBook {
    #[validate(custom(function = "validate_isbn"))]
    pub isbn: String,
    #[validate(length(min = 1, max = 300, message = "Book title is required"))]
    pub title: String,
    #[validate(length(min = 1, max = 200, message = "Author name is required"))]
    pub author: String,
    #[validate(range(min = 0, max = 2100, message = "Published year is out of range"))]
    pub published_year: Option<i32>,
    pub genre: Option<String>,
    pub description: Option<String>,
    pub shelf: Option<String>,
    pub section: Option<String>,
    #[validate(range(min = 0, max = 100000, message = "Quantity cannot be negative"))]
    pub quantity: Option<i32>,
}

/// Update book request
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBook {
    #[validate(custom(function = "validate_isbn"))]
    pub isbn: Option<String>,
    #[validate(length(min = 1, max = 300, message = "Book title cannot be empty"))]
    pub title: Option<String>,
    #[validate(length(min = 1, max = 200, message = "Author name cannot be empty"))]
    pub author: Option<String>,
    #[validate(range(min = 0, max = 2100, message = "Published year is out of range"))]
    pub published_year: Option<i32>,
    pub genre: Option<String>,
    pub description: Option<String>,
    pub shelf: Option<String>,
    pub section: Option<String>,
    #[validate(range(min = 0, max = 100000, message = "Quantity cannot be negative"))]
    pub quantity: Option<i32>,
}

impl UpdateBook {
    pub fn apply(self, book: &mut Book) {
        if let Some(isbn) = self.isbn {
            book.isbn = normalize_isbn(&isbn);
        }
        if let Some(title) = self.title {
            book.title = title.trim().to_string();
        }
        if let Some(author) = self.author {
            book.author = author.trim().to_string();
        }
        if self.published_year.is_some() {
            book.published_year = self.published_year;
        }
        if self.genre.is_some() {
            book.genre = self.genre;
        }
        if self.description.is_some() {
            book.description = self.description;
        }
        if self.shelf.is_some() {
            book.shelf = self.shelf;
        }
        if self.section.is_some() {
            book.section = self.section;
        }
    }
}

/// Book query parameters
#[derive(Debug, Clone, Default, Deserialize, Validate, IntoParams, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BookQuery {
    pub title: Option<String>,
    pub author: Option<String>,
    pub genre: Option<String>,
    pub isbn: Option<String>,
    /// Free text over title, author and genre
    pub q: Option<String>,
    pub available_only: Option<bool>,
    #[validate(range(min = 1, message = "page must be at least 1"))]
    pub page: Option<i64>,
    #[validate(range(min = 1, max = 100, message = "limit must be between 1 and 100"))]
    pub limit: Option<i64>,
}
