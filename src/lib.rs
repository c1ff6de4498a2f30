pub mod encoding;
pub mod error;
pub mod protocol;
pub mod term;
pub mod value;

pub use encoding::{Encoder, EncoderConfig, EncodingError, encode};
pub use error::Error;
pub use protocol::{Connection, QueryOptions, ResultStream};
pub use term::{Datum, Term};
pub use value::{FieldDecl, Record, Value};
