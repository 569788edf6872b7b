//! Axum extractor for the optional multipart parameter upload of a forecast request

use crate::error::ForecastError;

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{multipart::MultipartRejection, FromRequest, Multipart},
    http::{header, HeaderMap, Request},
};
use tracing::{event, Level};

/// Name of the form field carrying the algorithm parameters.
pub const PARAMETER_FIELD: &str = "parameter";

/// An axum extractor for the parameter upload of a forecast request.
///
/// Requests without a multipart body carry no parameters, which is not an error. The body is only
/// read when [ParameterUpload::read] is called.
#[derive(Debug)]
pub struct ParameterUpload(pub Option<Multipart>);

/// Whether the request declares a `multipart/form-data` body.
fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<mime::Mime>().ok())
        .map(|mime| mime.type_() == mime::MULTIPART && mime.subtype() == mime::FORM_DATA)
        .unwrap_or(false)
}

#[async_trait]
impl<S, B> FromRequest<S, B> for ParameterUpload
where
    S: Send + Sync,
    Multipart: FromRequest<S, B, Rejection = MultipartRejection>,
    B: Send + 'static,
{
    type Rejection = ForecastError;

    /// Extract a `ParameterUpload` from a `Request`.
    async fn from_request(req: Request<B>, state: &S) -> Result<Self, Self::Rejection> {
        if !is_multipart(req.headers()) {
            return Ok(ParameterUpload(None));
        }
        let multipart = Multipart::from_request(req, state).await?;
        Ok(ParameterUpload(Some(multipart)))
    }
}

impl ParameterUpload {
    /// Read the contents of the parameter field, if the upload has one.
    ///
    /// The contents are returned verbatim. Other fields are skipped.
    pub async fn read(self) -> Result<Option<Bytes>, ForecastError> {
        let Some(mut multipart) = self.0 else {
            return Ok(None);
        };
        while let Some(field) = multipart.next_field().await? {
            if field.name() == Some(PARAMETER_FIELD) {
                let parameter = field.bytes().await?;
                event!(Level::DEBUG, bytes = parameter.len(), "Received parameter upload");
                return Ok(Some(parameter));
            }
        }
        Ok(None)
    }
}
