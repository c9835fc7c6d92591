use crate::gate::Error;
use http_body_util::{BodyExt, Limited};
use hyper::body::{Body, Bytes};
use tracing::debug;

/// Buffer a request body of at most `limit` bytes.
pub async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, Error>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(error) => {
            debug!("Unable to read request body: {error}");
            Err(Error::BadRequest(format!(
                "request body unreadable or larger than {limit} bytes"
            )))
        }
    }
}
