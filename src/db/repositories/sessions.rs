use anyhow::{Context, Result};
use chrono::FixedOffset;
use csv::ByteRecord;
use log::warn;

use crate::db::{
    helpers::{
        format_bool, format_minutes, format_optional_timestamp, format_timestamp, parse_bool,
        parse_minutes, parse_optional_timestamp, parse_timestamp,
    },
    CsvLog, SessionLog, Table,
};
use crate::models::{SessionClose, SessionRecord, SessionStatus, SessionType};

fn row_to_session(table: &Table, row: &ByteRecord, offset: &FixedOffset) -> Result<SessionRecord> {
    let field = |name: &str| table.field(row, name);

    Ok(SessionRecord {
        id: field("session_id")?.trim().to_string(),
        start_time: parse_timestamp(field("start_time")?, offset, "start_time")?,
        end_time: parse_optional_timestamp(field("end_time")?, offset, "end_time")?,
        duration_minutes: parse_minutes(field("duration_minutes")?)?,
        project: field("project")?.to_string(),
        goal: field("goal")?.to_string(),
        session_type: SessionType::parse(field("session_type")?)?,
        status: SessionStatus::parse(field("status")?)?,
        auto_closed: parse_bool(field("auto_closed")?)?,
    })
}

fn session_to_values(record: &SessionRecord, offset: &FixedOffset) -> Vec<(&'static str, String)> {
    vec![
        ("session_id", record.id.clone()),
        ("start_time", format_timestamp(&record.start_time, offset)),
        (
            "end_time",
            format_optional_timestamp(record.end_time.as_ref(), offset),
        ),
        ("duration_minutes", format_minutes(record.duration_minutes)),
        ("project", record.project.clone()),
        ("goal", record.goal.clone()),
        ("session_type", record.session_type.as_str().to_string()),
        ("status", record.status.as_str().to_string()),
        ("auto_closed", format_bool(record.auto_closed).to_string()),
    ]
}

/// Rows that parsed, plus a label for every `in_progress` row that did not.
struct Scan {
    sessions: Vec<SessionRecord>,
    unreadable_open: Vec<String>,
}

fn raw_field(table: &Table, row: &ByteRecord, name: &str) -> String {
    table
        .column(name)
        .ok()
        .and_then(|index| row.get(index))
        .map(|raw| String::from_utf8_lossy(raw).trim().to_string())
        .unwrap_or_default()
}

/// Parses every row. Rows that do not parse are skipped for reads but stay
/// in the file; open ones are reported since recovery cannot close them.
fn scan_sessions(log: &CsvLog) -> Result<Scan> {
    let table = log.read_table()?;
    let mut scan = Scan {
        sessions: Vec::with_capacity(table.rows.len()),
        unreadable_open: Vec::new(),
    };

    for (index, row) in table.rows.iter().enumerate() {
        let err = match row_to_session(&table, row, log.offset()) {
            Ok(session) => {
                scan.sessions.push(session);
                continue;
            }
            Err(err) => err,
        };

        let line = index + 2;
        let id = raw_field(&table, row, "session_id");
        let status = raw_field(&table, row, "status");
        if status == SessionStatus::InProgress.as_str() {
            warn!(
                "Session row {id:?} (line {line}) is {status} but unreadable; \
                 it cannot be recovered and needs a manual fix: {err:#}"
            );
            let label = if id.is_empty() {
                format!("line {line}")
            } else {
                id
            };
            scan.unreadable_open.push(label);
        } else {
            warn!("Skipping malformed session row {id:?} (line {line}, status {status:?}): {err:#}");
        }
    }
    Ok(scan)
}

impl SessionLog {
    pub async fn insert_session(&self, session: &SessionRecord) -> Result<()> {
        let record = session.clone();
        self.execute(move |log| {
            let values = session_to_values(&record, log.offset());
            log.append(&values)
                .with_context(|| format!("failed to insert session {}", record.id))
        })
        .await
    }

    /// Closes the row keyed by `session_id` with an atomic rewrite of the log.
    /// Returns `false` when no row matches; that is logged, not raised.
    pub async fn close_session(&self, session_id: &str, close: SessionClose) -> Result<bool> {
        let session_id = session_id.trim().to_string();
        self.execute(move |log| {
            let mut table = log.read_table()?;
            let id_col = table.column("session_id")?;
            let end_col = table.column("end_time")?;
            let duration_col = table.column("duration_minutes")?;
            let status_col = table.column("status")?;
            let auto_col = table.column("auto_closed")?;
            let width = table.headers.len();
            let offset = *log.offset();

            let Some(row) = table
                .rows
                .iter_mut()
                .find(|row| {
                    row.get(id_col)
                        .and_then(|raw| std::str::from_utf8(raw).ok())
                        .map(str::trim)
                        == Some(session_id.as_str())
                })
            else {
                warn!("Session {session_id} not found in session log; close not recorded");
                return Ok(false);
            };

            let mut fields: Vec<Vec<u8>> = row.iter().map(<[u8]>::to_vec).collect();
            fields.resize(width, Vec::new());
            fields[end_col] = format_timestamp(&close.end_time, &offset).into_bytes();
            fields[duration_col] = format_minutes(close.duration_minutes).into_bytes();
            fields[status_col] = SessionStatus::Closed.as_str().as_bytes().to_vec();
            fields[auto_col] = format_bool(close.auto_closed).as_bytes().to_vec();
            *row = ByteRecord::from(fields);

            log.rewrite(&table)
                .with_context(|| format!("failed to close session {session_id}"))?;
            Ok(true)
        })
        .await
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        self.execute(|log| scan_sessions(log).map(|scan| scan.sessions))
            .await
    }

    /// Ids (or line labels) of `in_progress` rows that cannot be parsed.
    pub async fn unreadable_open_rows(&self) -> Result<Vec<String>> {
        self.execute(|log| scan_sessions(log).map(|scan| scan.unreadable_open))
            .await
    }

    /// Newest first by start time.
    pub async fn history(&self, limit: usize) -> Result<Vec<SessionRecord>> {
        let mut sessions = self.list_sessions().await?;
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        sessions.truncate(limit);
        Ok(sessions)
    }

    /// Rows still marked `in_progress`, oldest first.
    pub async fn incomplete_sessions(&self) -> Result<Vec<SessionRecord>> {
        let mut sessions: Vec<SessionRecord> = self
            .list_sessions()
            .await?
            .into_iter()
            .filter(SessionRecord::is_open)
            .collect();
        sessions.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::helpers::{now_in, parse_utc_offset};
    use chrono::Duration;
    use std::fs;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> SessionLog {
        SessionLog::open(
            dir.path().join("sessions.csv"),
            parse_utc_offset("+05:30").unwrap(),
        )
        .unwrap()
    }

    fn record(log: &SessionLog, id: &str, minutes_ago: i64) -> SessionRecord {
        let start = now_in(log.offset()) - Duration::minutes(minutes_ago);
        SessionRecord::open(
            id.to_string(),
            start,
            "Proj1".into(),
            "Write, \"quoted\" notes".into(),
            SessionType::Manual,
        )
    }

    #[tokio::test]
    async fn insert_then_close_updates_only_matching_row() {
        let dir = TempDir::new().unwrap();
        let log = open(&dir);
        log.insert_session(&record(&log, "a", 30)).await.unwrap();
        log.insert_session(&record(&log, "b", 10)).await.unwrap();

        let close = SessionClose {
            end_time: now_in(log.offset()),
            duration_minutes: 10.0 / 60.0,
            auto_closed: false,
        };
        assert!(log.close_session("b", close).await.unwrap());

        let sessions = log.list_sessions().await.unwrap();
        let a = sessions.iter().find(|s| s.id == "a").unwrap();
        let b = sessions.iter().find(|s| s.id == "b").unwrap();
        assert_eq!(a.status, SessionStatus::InProgress);
        assert!(a.end_time.is_none());
        assert_eq!(b.status, SessionStatus::Closed);
        assert!(b.end_time.is_some());
        assert!((b.duration_minutes - 0.17).abs() < 1e-9);
        assert!(!b.auto_closed);
        assert_eq!(b.goal, "Write, \"quoted\" notes");
    }

    #[tokio::test]
    async fn closing_unknown_id_is_reported_not_raised() {
        let dir = TempDir::new().unwrap();
        let log = open(&dir);
        log.insert_session(&record(&log, "a", 1)).await.unwrap();

        let close = SessionClose {
            end_time: now_in(log.offset()),
            duration_minutes: 1.0,
            auto_closed: true,
        };
        assert!(!log.close_session("missing", close).await.unwrap());
        assert_eq!(log.incomplete_sessions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn history_is_newest_first_and_skips_malformed_rows() {
        let dir = TempDir::new().unwrap();
        let log = open(&dir);
        log.insert_session(&record(&log, "old", 60)).await.unwrap();
        log.insert_session(&record(&log, "new", 5)).await.unwrap();
        log.execute(|csv| {
            csv.append(&[
                ("session_id", "broken".to_string()),
                ("start_time", "not a time".to_string()),
            ])
        })
        .await
        .unwrap();

        let history = log.history(10).await.unwrap();
        let ids: Vec<&str> = history.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(log.history(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reopening_keeps_existing_rows() {
        let dir = TempDir::new().unwrap();
        {
            let log = open(&dir);
            log.insert_session(&record(&log, "a", 3)).await.unwrap();
        }
        let log = open(&dir);
        let open_rows = log.incomplete_sessions().await.unwrap();
        assert_eq!(open_rows.len(), 1);
        assert_eq!(open_rows[0].id, "a");
    }

    #[tokio::test]
    async fn closing_a_session_keeps_rows_that_do_not_decode() {
        let dir = TempDir::new().unwrap();
        let log = open(&dir);
        let mut raw = fs::read(log.path()).unwrap();
        raw.extend_from_slice(
            b"legacy,2024-01-01T09:00:00,2024-01-01T10:00:00,60.00,caf\xe9,old,manual,closed,True\n",
        );
        fs::write(log.path(), &raw).unwrap();

        log.insert_session(&record(&log, "a", 5)).await.unwrap();
        let close = SessionClose {
            end_time: now_in(log.offset()),
            duration_minutes: 5.0,
            auto_closed: false,
        };
        assert!(log.close_session("a", close).await.unwrap());

        let after = fs::read(log.path()).unwrap();
        let legacy = b"legacy,2024-01-01T09:00:00,2024-01-01T10:00:00,60.00,caf\xe9,old";
        assert!(after.windows(legacy.len()).any(|window| window == legacy));

        let ids: Vec<String> = log
            .list_sessions()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn open_rows_that_do_not_parse_are_reported() {
        let dir = TempDir::new().unwrap();
        let log = open(&dir);
        log.insert_session(&record(&log, "good", 5)).await.unwrap();
        log.execute(|csv| {
            csv.append(&[
                ("session_id", "stuck".to_string()),
                ("start_time", "yesterday-ish".to_string()),
                ("session_type", "manual".to_string()),
                ("status", "in_progress".to_string()),
            ])?;
            csv.append(&[
                ("session_id", "old".to_string()),
                ("start_time", "garbage".to_string()),
                ("status", "closed".to_string()),
            ])
        })
        .await
        .unwrap();

        assert_eq!(log.unreadable_open_rows().await.unwrap(), vec!["stuck".to_string()]);
        let open_rows = log.incomplete_sessions().await.unwrap();
        assert_eq!(open_rows.len(), 1);
        assert_eq!(open_rows[0].id, "good");
    }
}
