use anyhow::{anyhow, bail, Context, Result};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use std::io::{self, Write};

const USER_HEADER: &str = "X-Remote-User";
const OPEN: &[u8] = b"<pre>";
const CLOSE: &[u8] = b"</pre>\n";

pub struct ClientCli {
    inner: reqwest::Client,
    base: String,
}

#[derive(Debug, Deserialize)]
struct LogEntry {
    id: String,
    name: String,
    user: String,
    start: String,
    duration: Option<f64>,
    status: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct LogPage {
    entries: Vec<LogEntry>,
    length: usize,
}

impl ClientCli {
    pub fn connect(server: &str) -> Self {
        Self {
            inner: reqwest::Client::new(),
            base: server.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base, path);
        let value: Value = self
            .inner
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?
            .error_for_status()?
            .json()
            .await?;
        if let Some(err) = value.get("error").and_then(Value::as_str) {
            bail!("server: {}", err);
        }
        Ok(value)
    }

    pub async fn list_jobs(&self) -> Result<()> {
        let jobs: Vec<String> = serde_json::from_value(self.get_json("/jobs", &[]).await?)?;
        for job in jobs {
            println!("{}", job);
        }
        Ok(())
    }

    /// Start `job` and copy its transcript to stdout as chunks arrive.
    pub async fn run(&self, job: &str, user: Option<&str>) -> Result<()> {
        let url = format!("{}/run/{}", self.base, job);
        let mut request = self.inner.post(&url);
        if let Some(user) = user {
            request = request.header(USER_HEADER, user);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?
            .error_for_status()?;

        let mut stdout = io::stdout();
        let mut unwrap = PreUnwrapper::default();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| anyhow!("stream interrupted: {}", err))?;
            stdout.write_all(&unwrap.push(&chunk))?;
            stdout.flush()?;
        }
        stdout.write_all(&unwrap.finish())?;
        stdout.flush()?;
        Ok(())
    }

    pub async fn list_logs(&self, job: Option<&str>, page: usize) -> Result<()> {
        let mut query = vec![("page", page.to_string())];
        if let Some(job) = job {
            query.push(("job", job.to_string()));
        }
        let page_data: LogPage = serde_json::from_value(self.get_json("/logs", &query).await?)?;
        for entry in &page_data.entries {
            let duration = entry
                .duration
                .map(|d| format!("{:.1}s", d))
                .unwrap_or_else(|| "-".into());
            let status = entry
                .status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "running".into());
            println!(
                "{}\t{}\t{}\t{}\t{}\t{}",
                entry.id, entry.start, entry.name, entry.user, duration, status
            );
        }
        println!(
            "({} shown, {} total, page {})",
            page_data.entries.len(),
            page_data.length,
            page
        );
        Ok(())
    }

    pub async fn show_log(&self, id: &str) -> Result<()> {
        let value = self.get_json("/logs", &[("id", id.to_string())]).await?;
        let body = value
            .get("body")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("server response has no body"))?;
        print!("{}", body);
        Ok(())
    }
}

/// Strips the `<pre>` wrapper the server puts around a streamed transcript,
/// whatever the chunk boundaries.
#[derive(Default)]
struct PreUnwrapper {
    opened: bool,
    held: Vec<u8>,
}

impl PreUnwrapper {
    /// Bytes safe to print now. The tail that could still be the closing tag is held back.
    fn push(&mut self, chunk: &[u8]) -> Vec<u8> {
        self.held.extend_from_slice(chunk);
        if !self.opened {
            if self.held.len() < OPEN.len() && OPEN.starts_with(&self.held) {
                return Vec::new();
            }
            if self.held.starts_with(OPEN) {
                self.held.drain(..OPEN.len());
            }
            self.opened = true;
        }
        let keep = CLOSE.len().min(self.held.len());
        let ready = self.held.len() - keep;
        self.held.drain(..ready).collect()
    }

    fn finish(self) -> Vec<u8> {
        let mut rest = self.held;
        if self.opened && rest.ends_with(CLOSE) {
            rest.truncate(rest.len() - CLOSE.len());
        }
        rest
    }
}
