//! Hashing, codecs, and binary classification for the Fossil-core artifact
//! store (component C1).

mod classify;
mod codec;
mod hash;

pub use classify::{has_bom, has_mixed_line_endings, looks_binary, utf8_validate};
pub use codec::{
    base64_decode, base64_encode, defossilize, fossilize, hex_decode, hex_encode, CodecError,
};
pub use hash::{hash, md5_hex, Hash, HashAlgo, HashError, HashPolicy};
