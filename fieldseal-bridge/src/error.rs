use thiserror::Error;

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Why an analysis call produced no usable document.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{method} exited with {}: {stderr}", describe_exit(.code))]
    Exit {
        method: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{method} printed malformed JSON: {source}")]
    Malformed {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}
