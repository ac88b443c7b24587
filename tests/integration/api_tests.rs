//! API integration tests
//!
//! These run against a live server (`database.url = "memory"` is enough).

use reqwest::Client;
use serde_json::{json, Value};

const BASE_URL: &str = "http://localhost:3000/api/v1";

fn unique_isbn() -> String {
    format!("979{:010}", rand::random::<u32>())
}

fn unique_email() -> String {
    format!("reader-{}@example.org", uuid::Uuid::new_v4().simple())
}

/// Create a book and return its id
async fn create_book(client: &Client, quantity: i32) -> String {
    let response = client
        .post(format!("{}/books", BASE_URL))
        .json(&json!({
            "isbn": unique_isbn(),
            "title": "The Left Hand of Darkness",
            "author": "Ursula K. Le Guin",
            "genre": "Science Fiction",
            "quantity": quantity
        }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.expect("Failed to parse response");
    body["data"]["id"].as_str().expect("No book id").to_string()
}

/// Create a member and return its id
async fn create_member(client: &Client) -> String {
    let response = client
        .post(format!("{}/users", BASE_URL))
        .json(&json!({
            "name": "Test Reader",
            "email": unique_email()
        }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.expect("Failed to parse response");
    body["data"]["id"].as_str().expect("No member id").to_string()
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored
async fn test_health_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/health", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
#[ignore]
async fn test_readiness() {
    let client = Client::new();

    let response = client
        .get(format!("{}/ready", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
}

#[tokio::test]
#[ignore]
async fn test_list_books() {
    let client = Client::new();
    create_book(&client, 2).await;

    let response = client
        .get(format!("{}/books?q=darkness&limit=5", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["success"], true);
    assert!(body["data"].is_array());
    assert_eq!(body["meta"]["pagination"]["limit"], 5);
}

#[tokio::test]
#[ignore]
async fn test_duplicate_member_email() {
    let client = Client::new();
    let email = unique_email();

    for expected in [201, 409] {
        let response = client
            .post(format!("{}/users", BASE_URL))
            .json(&json!({ "name": "Twin", "email": email }))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status(), expected);
    }
}

#[tokio::test]
#[ignore]
async fn test_loan_lifecycle() {
    let client = Client::new();
    let book_id = create_book(&client, 1).await;
    let member_id = create_member(&client).await;

    // Checkout
    let response = client
        .post(format!("{}/borrows", BASE_URL))
        .json(&json!({ "userId": member_id, "bookId": book_id }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.expect("Failed to parse response");
    let loan_id = body["data"]["id"].as_str().expect("No loan id").to_string();
    assert!(body["data"]["transactionId"].as_str().unwrap().starts_with("TXN-"));

    // Book now has no copies left
    let response = client
        .get(format!("{}/books/{}", BASE_URL, book_id))
        .send()
        .await
        .expect("Failed to send request");
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["data"]["availableQuantity"], 0);

    // Renew by ten days
    let response = client
        .post(format!("{}/borrows/{}/renew", BASE_URL, loan_id))
        .json(&json!({ "extensionDays": 10 }))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["data"]["renewalCount"], 1);

    // Return on time
    let response = client
        .post(format!("{}/borrows/{}/return", BASE_URL, loan_id))
        .json(&json!({ "bookCondition": "good" }))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["data"]["status"], "returned");

    // No fine to pay
    let response = client
        .post(format!("{}/borrows/{}/pay-fine", BASE_URL, loan_id))
        .json(&json!({ "paymentMethod": "cash" }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 400);

    // History reflects the returned loan
    let response = client
        .get(format!("{}/borrows/user/{}", BASE_URL, member_id))
        .send()
        .await
        .expect("Failed to send request");
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["data"]["summary"]["total"], 1);
    assert_eq!(body["data"]["summary"]["returned"], 1);
}

#[tokio::test]
#[ignore]
async fn test_flagged_overdue_loan() {
    let client = Client::new();
    let book_id = create_book(&client, 1).await;
    let member_id = create_member(&client).await;

    let response = client
        .post(format!("{}/borrows", BASE_URL))
        .json(&json!({ "userId": member_id, "bookId": book_id }))
        .send()
        .await
        .expect("Failed to send request");
    let body: Value = response.json().await.expect("Failed to parse response");
    let loan_id = body["data"]["id"].as_str().expect("No loan id").to_string();

    // Flag the loan overdue ahead of its due date
    let response = client
        .put(format!("{}/borrows/{}", BASE_URL, loan_id))
        .json(&json!({ "status": "overdue" }))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let response = client
        .get(format!("{}/borrows/{}", BASE_URL, loan_id))
        .send()
        .await
        .expect("Failed to send request");
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["data"]["status"], "overdue");

    // Overdue loans cannot be renewed
    let response = client
        .post(format!("{}/borrows/{}/renew", BASE_URL, loan_id))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 400);

    let response = client
        .get(format!("{}/borrows/overdue?limit=100", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");
    let body: Value = response.json().await.expect("Failed to parse response");
    let ids: Vec<&str> = body["data"]
        .as_array()
        .expect("data is not an array")
        .iter()
        .filter_map(|loan| loan["id"].as_str())
        .collect();
    assert!(ids.contains(&loan_id.as_str()));
}

#[tokio::test]
#[ignore]
async fn test_fine_report() {
    let client = Client::new();

    let response = client
        .get(format!("{}/borrows/fines/report", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body["data"]["groups"].is_array());
}

#[tokio::test]
#[ignore]
async fn test_unknown_loan() {
    let client = Client::new();

    let response = client
        .get(format!("{}/borrows/{}", BASE_URL, uuid::Uuid::new_v4()))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["success"], false);
}
