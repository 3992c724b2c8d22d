use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};

use super::schema::step_actions;
use crate::db::{now_ts, SqliteAsyncConn};
use crate::error::{AdminError, Result};
use crate::validation::{self, Validate, MAX_NAME_LEN, MAX_TEXT_LEN};

pub const ACTION_TYPES: &[&str] = &["press_button", "navigate", "wait", "verify"];

/// One thing the viewer is asked to do while following a diagnostic step.
#[derive(Debug, Clone, Serialize, Queryable)]
pub struct StepAction {
    pub id: i32,
    pub step_id: i32,
    pub position: i32,
    pub action_type: String,
    pub button: Option<String>,
    pub area: Option<String>,
    pub description: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepActionInput {
    pub action_type: String,
    pub button: Option<String>,
    pub area: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplaceActions {
    pub actions: Vec<StepActionInput>,
}

#[derive(Insertable)]
#[diesel(table_name = step_actions)]
struct NewStepAction<'a> {
    step_id: i32,
    position: i32,
    action_type: &'a str,
    button: Option<&'a str>,
    area: Option<&'a str>,
    description: Option<&'a str>,
    created_at: i64,
}

impl Validate for StepActionInput {
    fn validate(&self) -> Result<()> {
        validation::one_of("action_type", Some(self.action_type.as_str()), ACTION_TYPES)?;
        validation::optional_text("button", self.button.as_deref(), MAX_NAME_LEN)?;
        validation::optional_text("area", self.area.as_deref(), MAX_NAME_LEN)?;
        validation::optional_text("description", self.description.as_deref(), MAX_TEXT_LEN)?;
        if self.action_type == "press_button"
            && self.button.as_deref().map(str::trim).unwrap_or_default().is_empty()
        {
            return Err(AdminError::Validation(
                "press_button actions require a button".to_string(),
            ));
        }
        Ok(())
    }
}

impl Validate for ReplaceActions {
    fn validate(&self) -> Result<()> {
        self.actions.iter().try_for_each(Validate::validate)
    }
}

pub(crate) async fn list_for_step(
    conn: &mut SqliteAsyncConn,
    step_id: i32,
) -> Result<Vec<StepAction>> {
    let actions = step_actions::table
        .filter(step_actions::step_id.eq(step_id))
        .order(step_actions::position.asc())
        .load::<StepAction>(conn)
        .await?;
    Ok(actions)
}

/// Drops the step's actions and writes `actions` in order, positions starting at 1.
pub(crate) async fn replace_for_step(
    conn: &mut SqliteAsyncConn,
    step_id: i32,
    actions: &[StepActionInput],
) -> Result<Vec<StepAction>> {
    diesel::delete(step_actions::table.filter(step_actions::step_id.eq(step_id)))
        .execute(conn)
        .await?;

    let now = now_ts();
    for (idx, action) in actions.iter().enumerate() {
        diesel::insert_into(step_actions::table)
            .values(&NewStepAction {
                step_id,
                position: (idx + 1) as i32,
                action_type: action.action_type.as_str(),
                button: action.button.as_deref(),
                area: action.area.as_deref(),
                description: action.description.as_deref(),
                created_at: now,
            })
            .execute(conn)
            .await?;
    }

    list_for_step(conn, step_id).await
}

pub(crate) async fn copy_actions(
    conn: &mut SqliteAsyncConn,
    from_step: i32,
    to_step: i32,
) -> Result<usize> {
    let source = list_for_step(conn, from_step).await?;
    let inputs: Vec<StepActionInput> = source
        .into_iter()
        .map(|action| StepActionInput {
            action_type: action.action_type,
            button: action.button,
            area: action.area,
            description: action.description,
        })
        .collect();
    let copied = replace_for_step(conn, to_step, &inputs).await?;
    Ok(copied.len())
}
