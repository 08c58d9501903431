use std::path::Path;

use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;

use crate::error::Error;

pub(crate) async fn read_text(path: &Path) -> Result<String, Error> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })
}

pub(crate) async fn parse_json<T: DeserializeOwned>(path: &Path) -> Result<T, Error> {
    let text = read_text(path).await?;
    serde_json::from_str(&text).map_err(|source| Error::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes `rendered` plus a trailing newline to `output`, or to stdout when no path is given.
pub(crate) async fn write_output(output: Option<&Path>, rendered: &str) -> Result<(), Error> {
    let mut text = String::with_capacity(rendered.len() + 1);
    text.push_str(rendered);
    text.push('\n');

    match output {
        Some(path) => tokio::fs::write(path, text)
            .await
            .map_err(|source| Error::Write {
                path: path.to_path_buf(),
                source,
            }),
        None => {
            let mut stdout = tokio::io::stdout();
            stdout
                .write_all(text.as_bytes())
                .await
                .map_err(Error::Stdout)?;
            stdout.flush().await.map_err(Error::Stdout)
        }
    }
}
