//! Books repository for database operations

use sqlx::{Pool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::book::{normalize_isbn, Book, BookQuery},
};

use super::page_window;

const BOOK_COLUMNS: &str = "id, isbn, title, author, published_year, genre, description, \
     shelf, section, quantity, available_quantity, created_at, updated_at";

#[derive(Clone)]
pub struct BooksRepository {
    pool: Pool<Postgres>,
}

impl BooksRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get book by ID
    pub async fn get_by_id(&self, id: Uuid) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>(&format!("SELECT {} FROM books WHERE id = $1", BOOK_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(book)
    }

    pub async fn get_by_isbn(&self, isbn: &str) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>(&format!("SELECT {} FROM books WHERE isbn = $1", BOOK_COLUMNS))
            .bind(normalize_isbn(isbn))
            .fetch_optional(&self.pool)
            .await?;
        Ok(book)
    }

    /// Search books with pagination
    pub async fn search(&self, query: &BookQuery) -> AppResult<(Vec<Book>, i64)> {
        let (_, limit, offset) = page_window(query.page, query.limit);

        fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &BookQuery) {
            builder.push(" WHERE 1=1");
            if let Some(ref title) = query.title {
                builder.push(" AND title ILIKE ").push_bind(format!("%{}%", title));
            }
            if let Some(ref author) = query.author {
                builder.push(" AND author ILIKE ").push_bind(format!("%{}%", author));
            }
            if let Some(ref genre) = query.genre {
                builder.push(" AND genre ILIKE ").push_bind(format!("%{}%", genre));
            }
            if let Some(ref isbn) = query.isbn {
                builder.push(" AND isbn = ").push_bind(normalize_isbn(isbn));
            }
            if let Some(ref q) = query.q {
                builder
                    .push(" AND to_tsvector('simple', title || ' ' || author || ' ' || coalesce(genre, '')) @@ plainto_tsquery('simple', ")
                    .push_bind(q.clone())
                    .push(")");
            }
            if query.available_only.unwrap_or(false) {
                builder.push(" AND available_quantity > 0");
            }
        }

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM books");
        push_filters(&mut count, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM books", BOOK_COLUMNS));
        push_filters(&mut select, query);
        select
            .push(" ORDER BY title ASC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        let books = select.build_query_as::<Book>().fetch_all(&self.pool).await?;

        Ok((books, total))
    }

    pub async fn insert(&self, book: &Book) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO books (
                id, isbn, title, author, published_year, genre, description,
                shelf, section, quantity, available_quantity, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(book.id)
        .bind(&book.isbn)
        .bind(&book.title)
        .bind(&book.author)
        .bind(book.published_year)
        .bind(&book.genre)
        .bind(&book.description)
        .bind(&book.shelf)
        .bind(&book.section)
        .bind(book.quantity)
        .bind(book.available_quantity)
        .bind(book.created_at)
        .bind(book.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update(&self, book: &Book, expected_available: i32) -> AppResult<Option<Book>> {
        let updated = sqlx::query_as::<_, Book>(&format!(
            r#"
            UPDATE books
            SET isbn = $2, title = $3, author = $4, published_year = $5, genre = $6,
                description = $7, shelf = $8, section = $9,
                quantity = $10, available_quantity = $11, updated_at = NOW()
            WHERE id = $1 AND available_quantity = $12
            RETURNING {}
            "#,
            BOOK_COLUMNS
        ))
        .bind(book.id)
        .bind(&book.isbn)
        .bind(&book.title)
        .bind(&book.author)
        .bind(book.published_year)
        .bind(&book.genre)
        .bind(&book.description)
        .bind(&book.shelf)
        .bind(&book.section)
        .bind(book.quantity)
        .bind(book.available_quantity)
        .bind(expected_available)
        .fetch_optional(&self.pool)
        .await?;
        Ok(updated)
    }

    pub async fn delete_if_shelved(&self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM books WHERE id = $1 AND quantity = available_quantity")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Availability check and decrement in one statement
    pub async fn reserve_copy(&self, id: Uuid) -> AppResult<Option<Book>> {
        self.adjust(
            id,
            "available_quantity = available_quantity - 1",
            "available_quantity > 0",
        )
        .await
    }

    pub async fn release_copy(&self, id: Uuid) -> AppResult<Option<Book>> {
        self.adjust(
            id,
            "available_quantity = available_quantity + 1",
            "available_quantity < quantity",
        )
        .await
    }

    pub async fn retire_copy(&self, id: Uuid) -> AppResult<Option<Book>> {
        self.adjust(id, "quantity = quantity - 1", "quantity > available_quantity")
            .await
    }

    async fn adjust(&self, id: Uuid, set: &str, guard: &str) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>(&format!(
            "UPDATE books SET {}, updated_at = NOW() WHERE id = $1 AND {} RETURNING {}",
            set, guard, BOOK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(book)
    }
}
