use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("the requested thumbnail size is invalid ({width}x{height})")]
    InvalidSize { width: i64, height: i64 },
    #[error("no source generator could decode the image: {}", join_errors(.0))]
    NoSourceGenerator(Vec<thumbnail_engine::Error>),
    #[error("the source file {0} does not appear to be an image")]
    InvalidImageFormat(String),
    #[error("storage error for {name}: {source}")]
    Storage {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Engine(thumbnail_engine::Error),
    #[error("metadata cache error: {0:#}")]
    Cache(#[from] anyhow::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("unknown alias: {0}")]
    UnknownAlias(String),
}

impl Error {
    pub(crate) fn storage(name: &str, source: io::Error) -> Self {
        Error::Storage {
            name: name.to_string(),
            source,
        }
    }
}

impl From<thumbnail_engine::Error> for Error {
    fn from(err: thumbnail_engine::Error) -> Self {
        match err {
            thumbnail_engine::Error::NoSourceGenerator(errors) => Error::NoSourceGenerator(errors),
            thumbnail_engine::Error::UnknownPlugin { .. } => Error::Config(err.to_string()),
            other => Error::Engine(other),
        }
    }
}

fn join_errors(errors: &[thumbnail_engine::Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
