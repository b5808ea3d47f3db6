/// Errors from the render-server REST layer.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The render server returned a non-2xx status code.
    #[error("Render server error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A 2xx response body did not have the expected shape.
    #[error("Unexpected render server response: {0}")]
    Decode(String),
}
