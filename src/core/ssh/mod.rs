pub mod client;

pub use client::{
    DebugSink, ExecOutput, PassphrasePrompt, RemoteExec, RemoteSession, SecretSource, PASSWORD_ENV,
};
