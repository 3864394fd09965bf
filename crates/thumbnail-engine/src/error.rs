pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("error while decoding or encoding the image: {0}")]
    Image(#[from] image::ImageError),
    #[error("jpeg encoding failed: {0}")]
    Jpeg(#[from] jpeg_encoder::EncodingError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("the `size` option is missing")]
    MissingSize,
    #[error("invalid value for the `{key}` option: {value}")]
    InvalidOption { key: String, value: String },
    #[error("invalid colour: {0}")]
    InvalidColor(String),
    #[error("exiftool failed: {0}")]
    Exiftool(String),
    #[error("no source generator could decode the image ({} errors)", .0.len())]
    NoSourceGenerator(Vec<Error>),
    #[error("unknown {kind}: {name}")]
    UnknownPlugin { kind: &'static str, name: String },
}
