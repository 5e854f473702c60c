//! Local IPC layer for `steward-ctl`.
//!
//! A named local socket (Unix domain socket on Linux/macOS, named pipe on
//! Windows) accepting line-delimited JSON commands. It is also registered
//! as the `ipc` channel so replies reach the connected CLI.

pub mod server;
