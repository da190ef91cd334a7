//! Integration-only crate; the smoke suite lives in `tests/`.
