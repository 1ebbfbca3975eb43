// src/storage/postgres.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool};

use super::{QuestionRepository, SessionStore, SettingsStore, StoreError};
use crate::models::{
    question::{Case, Parameter, ParameterValue, Question},
    session::{GroupId, NewQuizSession, QuizSession, SessionStatus},
    settings::Setting,
};

macro_rules! session_columns {
    () => {
        " id, user_id, mode, status, current_question_id, current_group, group_order, \
          screen_size, created_at, updated_at, finished_at, question_requested_time, \
          completed, version "
    };
}

/// Postgres-backed adapter for sessions, questions and settings.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Raw 'quiz_sessions' row. Enum columns are stored as text.
#[derive(FromRow)]
struct SessionRow {
    id: i64,
    user_id: i64,
    mode: String,
    status: String,
    current_question_id: i64,
    current_group: i64,
    group_order: Vec<i64>,
    screen_size: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    question_requested_time: Option<DateTime<Utc>>,
    completed: bool,
    version: i64,
}

impl TryFrom<SessionRow> for QuizSession {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(QuizSession {
            id: row.id,
            user_id: row.user_id,
            mode: row.mode.parse().map_err(StoreError::Corrupt)?,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            current_question_id: row.current_question_id,
            current_group: GroupId(row.current_group),
            group_order: row.group_order,
            screen_size: row.screen_size,
            created_at: row.created_at,
            updated_at: row.updated_at,
            finished_at: row.finished_at,
            question_requested_time: row.question_requested_time,
            completed: row.completed,
            version: row.version,
        })
    }
}

/// Maps the partial unique index on active sessions to a conflict.
fn map_write_error(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict("user already has an active session".to_string())
        }
        _ => StoreError::Database(e),
    }
}

async fn insert_session(
    conn: &mut PgConnection,
    new: &NewQuizSession,
) -> Result<QuizSession, StoreError> {
    let row: SessionRow = sqlx::query_as(concat!(
        "INSERT INTO quiz_sessions \
            (user_id, mode, status, current_question_id, current_group, group_order, \
             screen_size, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8) \
         RETURNING",
        session_columns!()
    ))
        .bind(new.user_id)
        .bind(new.mode.as_str())
        .bind(SessionStatus::NotStarted.as_str())
        .bind(new.progress.current_question_id)
        .bind(new.progress.current_group.0)
        .bind(new.progress.group_order.as_slice())
        .bind(new.screen_size.as_deref())
        .bind(new.created_at)
        .fetch_one(conn)
        .await
        .map_err(map_write_error)?;

    row.try_into()
}

#[async_trait]
impl SessionStore for PgStore {
    async fn create(&self, new: NewQuizSession) -> Result<QuizSession, StoreError> {
        let mut conn = self.pool.acquire().await?;
        insert_session(&mut conn, &new).await
    }

    async fn supersede_and_create(
        &self,
        previous: &QuizSession,
        new: NewQuizSession,
    ) -> Result<QuizSession, StoreError> {
        let mut tx = self.pool.begin().await?;

        if !previous.is_finished() {
            let result = sqlx::query(
                r#"
                UPDATE quiz_sessions
                SET status = 'finished',
                    finished_at = $3,
                    updated_at = $3,
                    version = version + 1
                WHERE id = $1 AND version = $2
                "#,
            )
            .bind(previous.id)
            .bind(previous.version)
            .bind(new.created_at)
            .execute(&mut *tx)
            .await?;

            // Dropping `tx` rolls back.
            if result.rows_affected() == 0 {
                return Err(StoreError::Conflict(format!(
                    "session {} changed while being superseded",
                    previous.id
                )));
            }
        }

        let created = insert_session(&mut tx, &new).await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn get(&self, id: i64) -> Result<Option<QuizSession>, StoreError> {
        let row: Option<SessionRow> = sqlx::query_as(concat!(
            "SELECT",
            session_columns!(),
            "FROM quiz_sessions WHERE id = $1"
        ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(QuizSession::try_from).transpose()
    }

    async fn latest_for_user(&self, user_id: i64) -> Result<Option<QuizSession>, StoreError> {
        let row: Option<SessionRow> = sqlx::query_as(concat!(
            "SELECT",
            session_columns!(),
            "FROM quiz_sessions WHERE user_id = $1 ORDER BY created_at DESC, id DESC LIMIT 1"
        ))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(QuizSession::try_from).transpose()
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<QuizSession>, StoreError> {
        let rows: Vec<SessionRow> = sqlx::query_as(concat!(
            "SELECT",
            session_columns!(),
            "FROM quiz_sessions WHERE user_id = $1 ORDER BY created_at DESC, id DESC"
        ))
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(QuizSession::try_from).collect()
    }

    async fn update(&self, session: &QuizSession) -> Result<QuizSession, StoreError> {
        let row: Option<SessionRow> = sqlx::query_as(concat!(
            "UPDATE quiz_sessions \
             SET status = $3, \
                 current_question_id = $4, \
                 current_group = $5, \
                 group_order = $6, \
                 screen_size = $7, \
                 updated_at = $8, \
                 finished_at = $9, \
                 question_requested_time = $10, \
                 completed = $11, \
                 version = version + 1 \
             WHERE id = $1 AND version = $2 \
             RETURNING",
            session_columns!()
        ))
            .bind(session.id)
            .bind(session.version)
            .bind(session.status.as_str())
            .bind(session.current_question_id)
            .bind(session.current_group.0)
            .bind(session.group_order.as_slice())
            .bind(session.screen_size.as_deref())
            .bind(session.updated_at)
            .bind(session.finished_at)
            .bind(session.question_requested_time)
            .bind(session.completed)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_write_error)?;

        match row {
            Some(row) => row.try_into(),
            None => Err(StoreError::Conflict(format!(
                "session {} was modified concurrently",
                session.id
            ))),
        }
    }
}

/// Question joined with its case and correct option label.
#[derive(FromRow)]
struct QuestionRow {
    id: i64,
    question: String,
    prediction_age: i32,
    group_number: i64,
    correct_option: String,
    case_id: i64,
    code: String,
    gender: String,
    age1: i32,
    age2: i32,
    image1: Option<String>,
    image2: Option<String>,
}

/// A parameter together with the case's values for it.
#[derive(FromRow)]
struct ParameterRow {
    id: i64,
    name: String,
    description: Option<String>,
    reference_values: Option<String>,
    value1: f64,
    value2: f64,
    value3: f64,
}

#[async_trait]
impl QuestionRepository for PgStore {
    async fn question_by_id(&self, id: i64) -> Result<Option<Question>, StoreError> {
        let row: Option<QuestionRow> = sqlx::query_as(
            r#"
            SELECT
                q.id,
                q.question,
                q.prediction_age,
                q.group_number,
                o.option AS correct_option,
                c.id AS case_id,
                c.code,
                c.gender,
                c.age1,
                c.age2,
                c.image1,
                c.image2
            FROM questions q
            JOIN cases c ON c.id = q.case_id
            JOIN options o ON o.id = q.correct_option_id
            WHERE q.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let options = self.options_for_question(id).await?;

        let parameter_rows: Vec<ParameterRow> = sqlx::query_as(
            r#"
            SELECT p.id, p.name, p.description, p.reference_values,
                   cp.value1, cp.value2, cp.value3
            FROM case_parameters cp
            JOIN parameters p ON p.id = cp.parameter_id
            WHERE cp.case_id = $1
            ORDER BY p.id
            "#,
        )
        .bind(row.case_id)
        .fetch_all(&self.pool)
        .await?;

        let (parameters, parameter_values) = parameter_rows
            .into_iter()
            .map(|p| {
                (
                    Parameter {
                        id: p.id,
                        name: p.name,
                        description: p.description,
                        reference_values: p.reference_values,
                    },
                    ParameterValue {
                        parameter_id: p.id,
                        value1: p.value1,
                        value2: p.value2,
                        value3: p.value3,
                    },
                )
            })
            .unzip();

        Ok(Some(Question {
            id: row.id,
            group: GroupId(row.group_number),
            question: row.question,
            options,
            correct_option: row.correct_option,
            prediction_age: row.prediction_age,
            case: Case {
                id: row.case_id,
                code: row.code,
                gender: row.gender,
                age1: row.age1,
                age2: row.age2,
                image1: row.image1,
                image2: row.image2,
                parameters,
                parameter_values,
            },
        }))
    }

    async fn correct_option_for_question(&self, id: i64) -> Result<Option<String>, StoreError> {
        let option: Option<String> = sqlx::query_scalar(
            r#"
            SELECT o.option
            FROM questions q
            JOIN options o ON o.id = q.correct_option_id
            WHERE q.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(option)
    }

    async fn options_for_question(&self, id: i64) -> Result<Vec<String>, StoreError> {
        let options: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT o.option
            FROM question_options qo
            JOIN options o ON o.id = qo.option_id
            WHERE qo.question_id = $1
            ORDER BY qo.position
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(options)
    }

    async fn all_options(&self) -> Result<Vec<String>, StoreError> {
        let options: Vec<String> = sqlx::query_scalar("SELECT option FROM options ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(options)
    }

    async fn first_group(&self) -> Result<Option<GroupId>, StoreError> {
        let group: Option<i64> = sqlx::query_scalar("SELECT MIN(group_number) FROM questions")
            .fetch_one(&self.pool)
            .await?;
        Ok(group.map(GroupId))
    }

    async fn next_group(&self, after: GroupId) -> Result<Option<GroupId>, StoreError> {
        let group: Option<i64> =
            sqlx::query_scalar("SELECT MIN(group_number) FROM questions WHERE group_number > $1")
                .bind(after.0)
                .fetch_one(&self.pool)
                .await?;
        Ok(group.map(GroupId))
    }

    async fn group_question_ids(&self, group: GroupId) -> Result<Vec<i64>, StoreError> {
        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM questions WHERE group_number = $1 ORDER BY id")
                .bind(group.0)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }
}

#[async_trait]
impl SettingsStore for PgStore {
    async fn all_settings(&self) -> Result<Vec<Setting>, StoreError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT name, value FROM quiz_settings ORDER BY name")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(name, value)| Setting { name, value })
            .collect())
    }

    async fn get_setting(&self, name: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM quiz_settings WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    async fn save_setting(&self, setting: &Setting) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO quiz_settings (name, value)
            VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE SET value = EXCLUDED.value
            "#,
        )
        .bind(&setting.name)
        .bind(&setting.value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
