//! Forwards emitted records to stdout as JSON lines.
//!
//! Each line is the record's payload with the destination attached under
//! `@metadata`, the layout ingestion pipelines expect:
//!
//! ```json
//! {"@metadata":{"index":"issue","id":"ABC-1"},"id":"10001","key":"ABC-1","fields":{...}}
//! ```

use serde_json::{json, Map, Value};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedReceiver;

use pipeline::ChangeRecord;

/// Renders one record as a single line of JSON (without the newline).
pub fn event_line(record: &ChangeRecord) -> String {
    let mut event = match &record.payload {
        Value::Object(fields) => fields.clone(),
        other => {
            let mut fields = Map::new();
            fields.insert("payload".into(), other.clone());
            fields
        }
    };
    event.insert(
        "@metadata".into(),
        json!({"index": record.target_index.as_str(), "id": record.target_id.as_str()}),
    );
    Value::Object(event).to_string()
}

/// Writes every record received on `records` to `out`, one per line, until
/// all senders are dropped. Returns the number of records written.
pub async fn forward_json_lines<W>(
    mut records: UnboundedReceiver<ChangeRecord>,
    mut out: W,
) -> std::io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while let Some(record) = records.recv().await {
        let mut line = event_line(&record);
        line.push('\n');
        out.write_all(line.as_bytes()).await?;
        out.flush().await?;
        written += 1;
    }
    Ok(written)
}
