use log::{error, warn};
use openssl::ssl::{SslConnector, SslConnectorBuilder, SslMethod, SslVerifyMode};
use postgres_openssl::MakeTlsConnector;
use tokio::time::Duration;
use tokio_postgres::{Client, NoTls};
use url::Url;

const WAIT_BETWEEN_RETRIES: u64 = 5;

/// TLS builder that rejects servers whose certificate doesn't chain to a trusted CA
fn verifying_builder() -> Result<SslConnectorBuilder, String> {
    let mut builder =
        SslConnector::builder(SslMethod::tls()).map_err(|e| format!("SSL builder error: {}", e))?;
    builder.set_verify(SslVerifyMode::PEER);
    Ok(builder)
}

/// Connector that verifies the server against the CA at `sslrootcert_path`
pub fn create_ssl_connector(sslrootcert_path: &str) -> Result<MakeTlsConnector, String> {
    let mut builder = verifying_builder()?;

    builder
        .set_ca_file(sslrootcert_path)
        .map_err(|e| format!("Error loading CA cert: {}", e))?;

    Ok(MakeTlsConnector::new(builder.build()))
}

/// Split the libpq-incompatible `sslrootcert` parameter out of a database URL
///
/// Returns the cleaned URL and the certificate path, if one was given.
pub fn split_sslrootcert(database_url: &str) -> Result<(String, Option<String>), String> {
    let url = Url::parse(database_url).map_err(|e| format!("URL parse error: {}", e))?;

    let mut sslrootcert_path = None;
    let mut clean_params = Vec::new();
    for (key, value) in url.query_pairs() {
        if key == "sslrootcert" {
            sslrootcert_path = Some(value.to_string());
        } else {
            clean_params.push((key.into_owned(), value.into_owned()));
        }
    }

    let mut clean_url = url.clone();
    clean_url.set_query(None);
    if !clean_params.is_empty() {
        let query = clean_params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        clean_url.set_query(Some(&query));
    }

    Ok((clean_url.to_string(), sslrootcert_path))
}

/// Connect with TLS when a root certificate is configured, plain otherwise
async fn connect(database_url: &str) -> Result<Client, String> {
    let (clean_url, sslrootcert_path) = split_sslrootcert(database_url)?;

    match sslrootcert_path {
        Some(path) => {
            let connector = create_ssl_connector(&path)?;
            let (client, connection) = tokio_postgres::connect(&clean_url, connector)
                .await
                .map_err(|e| format!("Connection error: {}", e))?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    error!("Connection error: {}", e);
                }
            });
            Ok(client)
        }
        None => {
            let (client, connection) = tokio_postgres::connect(&clean_url, NoTls)
                .await
                .map_err(|e| format!("Connection error: {}", e))?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    error!("Connection error: {}", e);
                }
            });
            Ok(client)
        }
    }
}

/// Run `operation` on a fresh connection, retrying up to `max_retries` times
///
/// Retries are bounded so a database outage can't outlast the download
/// period; the caller leaves its cursor untouched on failure.
pub async fn execute_with_retry<F, Fut>(
    database_url: &str,
    max_retries: usize,
    operation: F,
) -> Result<u64, String>
where
    F: Fn(Client) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<u64, tokio_postgres::Error>> + Send,
{
    let attempts = max_retries.max(1);

    for attempt in 0..attempts {
        match connect(database_url).await {
            Ok(client) => match operation(client).await {
                Ok(rows) => return Ok(rows),
                Err(e) => error!("Attempt {}: query error: {}", attempt + 1, e),
            },
            Err(e) => error!("Attempt {}: {}", attempt + 1, e),
        }

        if attempt < attempts - 1 {
            warn!("Retrying database write in {} seconds", WAIT_BETWEEN_RETRIES);
            tokio::time::sleep(Duration::from_secs(WAIT_BETWEEN_RETRIES)).await;
        }
    }

    Err("Max retries exceeded".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_connector_verifies_server_certificate() {
        let connector = verifying_builder().unwrap().build();
        assert_eq!(connector.context().verify_mode(), SslVerifyMode::PEER);
    }

    #[test]
    fn missing_root_certificate_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("ca.pem");
        let err = create_ssl_connector(missing.to_str().unwrap()).err().unwrap();
        assert!(err.starts_with("Error loading CA cert"));
    }

    #[test]
    fn strips_sslrootcert_and_keeps_other_params() {
        let (url, cert) = split_sslrootcert(
            "postgres://user:pw@db.local:5432/gadgets?sslmode=require&sslrootcert=/etc/ca.pem",
        )
        .unwrap();
        assert_eq!(cert.as_deref(), Some("/etc/ca.pem"));
        assert_eq!(url, "postgres://user:pw@db.local:5432/gadgets?sslmode=require");
    }

    #[test]
    fn plain_url_has_no_cert() {
        let (url, cert) = split_sslrootcert("postgres://db.local/gadgets").unwrap();
        assert_eq!(cert, None);
        assert_eq!(url, "postgres://db.local/gadgets");
    }

    #[test]
    fn invalid_url_is_rejected() {
        assert!(split_sslrootcert("not a url").is_err());
    }
}
