//! Consumer behavior tests against an in-memory store.


mod scenarios;
