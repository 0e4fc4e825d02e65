//! `import-sql`: upload a SQL dump to a signed URL and trigger the
//! platform-side import.

use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::api::{ApiClient, Environment};
use crate::cli::ImportSqlArgs;
use crate::error::CliError;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("'{0}' does not look like a SQL dump (expected a .sql extension)")]
    NotSql(String),
    #[error("'{0}' is empty")]
    Empty(String),
    #[error("failed to read {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("upload failed: {0}")]
    Upload(#[from] reqwest::Error),
    #[error("upload rejected with http status {0}")]
    UploadStatus(reqwest::StatusCode),
}

pub async fn run(
    api: &ApiClient,
    environment: &Environment,
    args: &ImportSqlArgs,
) -> Result<i32, CliError> {
    let file_name = validate_dump(&args.file)?;

    // Imports replace the environment's database; production always gets a
    // confirmation unless --yes was passed.
    if environment.is_production && !args.yes {
        if !confirm_import(environment, &file_name)? {
            println!("Aborted.");
            return Ok(0);
        }
    }

    let upload_url = api.request_sql_upload(&environment.env_id, &file_name).await?;

    let bytes = tokio::fs::read(&args.file)
        .await
        .map_err(|source| ImportError::Read {
            path: args.file.display().to_string(),
            source,
        })?;
    let size = bytes.len();

    println!("Uploading {file_name} ({size} bytes)...");
    upload_dump(&upload_url, bytes).await?;

    api.start_sql_import(&environment.env_id).await?;
    println!(
        "Import started on {}/{}. Track progress with 'atoll wp --log'.",
        environment.app, environment.env
    );
    Ok(0)
}

fn validate_dump(path: &Path) -> Result<String, ImportError> {
    let display = path.display().to_string();
    if !path.exists() {
        return Err(ImportError::NotFound(display));
    }
    if path.extension().and_then(|ext| ext.to_str()) != Some("sql") {
        return Err(ImportError::NotSql(display));
    }
    let metadata = std::fs::metadata(path).map_err(|source| ImportError::Read {
        path: display.clone(),
        source,
    })?;
    if metadata.len() == 0 {
        return Err(ImportError::Empty(display));
    }
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or(ImportError::NotSql(display))?;
    Ok(file_name)
}

async fn upload_dump(upload_url: &str, bytes: Vec<u8>) -> Result<(), ImportError> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(3))
        .build()?;
    let response = client
        .put(upload_url)
        .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
        .body(bytes)
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(ImportError::UploadStatus(response.status()));
    }
    Ok(())
}

fn confirm_import(environment: &Environment, file_name: &str) -> io::Result<bool> {
    print!(
        "⚠️  Importing {file_name} will replace the database of {}/{} (production). Continue? (y/N) ",
        environment.app, environment.env
    );
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes" | "YES"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn rejects_missing_file() {
        let err = validate_dump(Path::new("/definitely/not/here.sql")).unwrap_err();
        assert!(matches!(err, ImportError::NotFound(_)));
    }

    #[test]
    fn rejects_non_sql_extension() {
        let dir = std::env::temp_dir();
        let path = dir.join("atoll-import-test.txt");
        std::fs::write(&path, "not sql").unwrap();
        let err = validate_dump(&path).unwrap_err();
        assert!(matches!(err, ImportError::NotSql(_)));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn rejects_empty_dump() {
        let dir = std::env::temp_dir();
        let path = dir.join("atoll-import-empty.sql");
        std::fs::File::create(&path).unwrap();
        let err = validate_dump(&path).unwrap_err();
        assert!(matches!(err, ImportError::Empty(_)));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn accepts_a_plain_dump() {
        let dir = std::env::temp_dir();
        let path = dir.join("atoll-import-ok.sql");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"CREATE TABLE wp_posts (id INT);\n").unwrap();
        drop(file);
        assert_eq!(validate_dump(&path).unwrap(), "atoll-import-ok.sql");
        std::fs::remove_file(&path).unwrap();
    }
}
