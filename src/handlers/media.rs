use std::io::Write as _;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::StatusCode;
use teloxide::prelude::*;
use teloxide::types::{FileId, PhotoSize};
use tempfile::NamedTempFile;
use tracing::{error, warn};

use crate::config::CONFIG;
use crate::generation::ReferenceImage;
use crate::session::StoredPhoto;
use crate::utils::http::get_http_client;

const PHOTO_DOWNLOAD_MAX_ATTEMPTS: usize = 3;
const PHOTO_DOWNLOAD_BASE_DELAY_MS: u64 = 400;

fn should_retry_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

async fn backoff(attempt: usize) {
    let delay = Duration::from_millis(PHOTO_DOWNLOAD_BASE_DELAY_MS << attempt);
    tokio::time::sleep(delay).await;
}

/// Telegram keeps several sizes of one photo; the last entry is the largest.
pub fn largest_photo(sizes: &[PhotoSize]) -> Option<&PhotoSize> {
    sizes.last()
}

/// The returned URL embeds the bot token and must never leave the process.
async fn get_file_url(bot: &Bot, file_id: &FileId) -> Result<String> {
    let file = bot.get_file(file_id.clone()).await?;
    Ok(format!(
        "https://api.telegram.org/file/bot{}/{}",
        CONFIG.bot_token, file.path
    ))
}

async fn download_bytes(url: &str) -> Result<Vec<u8>> {
    let client = get_http_client();
    for attempt in 0..PHOTO_DOWNLOAD_MAX_ATTEMPTS {
        let last_attempt = attempt + 1 == PHOTO_DOWNLOAD_MAX_ATTEMPTS;
        let response = match client.get(url).send().await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(
                    "Photo download request failed: timeout={}, connect={}, attempt={}/{}",
                    err.is_timeout(),
                    err.is_connect(),
                    attempt + 1,
                    PHOTO_DOWNLOAD_MAX_ATTEMPTS
                );
                if !should_retry_error(&err) || last_attempt {
                    return Err(anyhow!("photo download failed: {}", err.without_url()));
                }
                backoff(attempt).await;
                continue;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(
                "Photo download returned {status} (attempt={}/{})",
                attempt + 1,
                PHOTO_DOWNLOAD_MAX_ATTEMPTS
            );
            if !should_retry_status(status) || last_attempt {
                return Err(anyhow!("photo download returned {status}"));
            }
            backoff(attempt).await;
            continue;
        }

        match response.bytes().await {
            Ok(bytes) => return Ok(bytes.to_vec()),
            Err(err) => {
                error!("Failed to read photo bytes: {}", err.without_url());
                if last_attempt {
                    return Err(anyhow!("photo body could not be read"));
                }
                backoff(attempt).await;
            }
        }
    }

    Err(anyhow!("photo download exhausted its attempts"))
}

fn persist_to_tempfile(bytes: &[u8]) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("nano-banano-")
        .suffix(".img")
        .tempfile()
        .context("creating temporary photo file")?;
    file.write_all(bytes).context("writing temporary photo file")?;
    file.flush()?;
    Ok(file)
}

/// Fetches a user photo into a temporary file owned by the returned value.
pub async fn download_photo(bot: &Bot, photo: &PhotoSize) -> Result<StoredPhoto> {
    let url = get_file_url(bot, &photo.file.id).await?;
    let bytes = download_bytes(&url).await?;
    if bytes.is_empty() {
        return Err(anyhow!("downloaded photo is empty"));
    }
    let file = persist_to_tempfile(&bytes)?;
    Ok(StoredPhoto::new(photo.file.id.0.clone(), file))
}

/// Reads a stored photo back for the provider. Unreadable files degrade to a text-only request.
pub async fn load_reference(photo: &StoredPhoto) -> Option<ReferenceImage> {
    match tokio::fs::read(photo.path()).await {
        Ok(bytes) if !bytes.is_empty() => Some(ReferenceImage::new(bytes)),
        Ok(_) => {
            warn!(file_id = %photo.file_id, "Stored photo is empty, generating from text only");
            None
        }
        Err(err) => {
            warn!(file_id = %photo.file_id, "Stored photo could not be read: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[tokio::test]
    async fn stored_photo_reads_back_as_reference() {
        let file = persist_to_tempfile(&PNG_HEADER).unwrap();
        let photo = StoredPhoto::new("file-1", file);

        let reference = load_reference(&photo).await.expect("reference");
        assert_eq!(reference.mime_type(), "image/png");
    }

    #[tokio::test]
    async fn empty_photo_is_not_used_as_reference() {
        let file = persist_to_tempfile(&[]).unwrap();
        let photo = StoredPhoto::new("file-2", file);

        assert!(load_reference(&photo).await.is_none());
    }

    #[tokio::test]
    async fn download_retries_server_errors() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/photo.jpg"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/photo.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG_HEADER.to_vec()))
            .mount(&server)
            .await;

        let bytes = download_bytes(&format!("{}/photo.jpg", server.uri()))
            .await
            .unwrap();
        assert_eq!(bytes, PNG_HEADER.to_vec());
    }

    #[tokio::test]
    async fn download_gives_up_on_client_errors() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        assert!(download_bytes(&format!("{}/missing.jpg", server.uri()))
            .await
            .is_err());
    }
}
