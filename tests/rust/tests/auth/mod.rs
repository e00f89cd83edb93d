//! Authentication integration tests
//!
//! Token-authenticated clients against the validating mock gateway.
