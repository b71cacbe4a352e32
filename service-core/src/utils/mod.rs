pub mod signature;

pub use signature::{
    sign, sign_canonical, string_to_sign, verify, CanonicalHeaders, SignatureError, SIGNATURE_HEADER,
    SIGNATURE_HEADERS_HEADER,
};
