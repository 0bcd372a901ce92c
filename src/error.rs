use crate::client;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("need a valid UUID to retrieve virtual machine info")]
    MissingId,

    #[error(transparent)]
    Api(#[from] client::Error),

    #[error("updating virtual machine {uuid}: {source}")]
    Parse {
        uuid: String,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Encode(serde_json::Error),

    #[error(transparent)]
    Decode(serde_json::Error),

    #[error("virtual machine has no usable IP address")]
    NoIp,

    #[error("{0} not found in environment")]
    MissingEnv(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
