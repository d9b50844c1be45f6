//! Notification texts sent back to the chat.

use crate::pipeline::JobOutcome;

pub const BLANK_TRIGGER: &str = "❌ Ошибка: пустая строка";
pub const TRIGGER_MISMATCH: &str = "Код ничего не активирует";
pub const JOB_STARTED: &str = "Старт публикации…";

/// Render the notification for a finished job.
pub fn render(outcome: &JobOutcome) -> String {
    match outcome {
        JobOutcome::Uploaded { video_id } => format!("Создано видео, ID: {video_id}"),
        JobOutcome::UploadLimitExceeded { .. } => "Лимит отправки видео на YouTube".to_string(),
        JobOutcome::EmptyRow => "❌ Ошибка: нет данных в таблице".to_string(),
        JobOutcome::RowAccessFailed { message } => format!("❌ Ошибка: доступ к таблице: {message}"),
        JobOutcome::SourceFailed { message } => format!("❌ Ошибка: загрузка видео: {message}"),
        JobOutcome::AuthFailed { message } => {
            format!("❌ Ошибка: авторизация YouTube: {message}")
        }
        JobOutcome::UploadFailed { message } => {
            format!("❌ Ошибка: загрузка на YouTube: {message}")
        }
        JobOutcome::RowDeleteFailed { message, video_id } => {
            format!("❌ Ошибка: удаление строки: {message} (Видео загружено: {video_id})")
        }
    }
}

/// Fallback when a job ended without a recognised outcome.
pub fn unknown_status(status: &str) -> String {
    format!("❌ Ошибка: неизвестный статус: {status}")
}
