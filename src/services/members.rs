//! Member administration service

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::member::{CreateMember, Member, MemberQuery, UpdateMember},
    repository::CirculationStore,
};

fn member_not_found() -> AppError {
    AppError::NotFound("User not found".to_string())
}

fn email_taken() -> AppError {
    AppError::Conflict("User with this email already exists".to_string())
}

#[derive(Clone)]
pub struct MembersService {
    store: Arc<dyn CirculationStore>,
    membership_years: i32,
}

impl MembersService {
    pub fn new(store: Arc<dyn CirculationStore>, membership_years: i32) -> Self {
        Self {
            store,
            membership_years,
        }
    }

    pub async fn search_members(&self, query: &MemberQuery) -> AppResult<(Vec<Member>, i64)> {
        self.store.list_members(query).await
    }

    pub async fn get_member(&self, id: Uuid) -> AppResult<Member> {
        self.store.get_member(id).await?.ok_or_else(member_not_found)
    }

    /// Register a member. The card code is generated and the membership runs
    /// for the configured number of years unless an expiry is given.
    pub async fn create_member(&self, request: CreateMember) -> AppResult<Member> {
        if self.store.find_member_by_email(&request.email).await?.is_some() {
            return Err(email_taken());
        }

        let member = request.into_member(Utc::now(), self.membership_years);
        self.store.insert_member(&member).await?;

        tracing::info!("Member {} registered ({})", member.id, member.member_code);
        Ok(member)
    }

    pub async fn update_member(&self, id: Uuid, request: UpdateMember) -> AppResult<Member> {
        let mut member = self.get_member(id).await?;

        if let Some(ref email) = request.email {
            if let Some(other) = self.store.find_member_by_email(email).await? {
                if other.id != id {
                    return Err(email_taken());
                }
            }
        }
        request.apply(&mut member);

        let updated = self
            .store
            .update_member(&member)
            .await?
            .ok_or_else(member_not_found)?;
        tracing::info!("Member {} updated", id);
        Ok(updated)
    }

    /// Remove a member. Refused while they have open loans.
    pub async fn delete_member(&self, id: Uuid) -> AppResult<()> {
        let member = self.get_member(id).await?;
        if !member.open_loans.is_empty() || !self.store.delete_member(id).await? {
            return Err(AppError::Conflict(
                "Cannot delete a user with open loans".to_string(),
            ));
        }
        tracing::info!("Member {} deleted", id);
        Ok(())
    }
}
