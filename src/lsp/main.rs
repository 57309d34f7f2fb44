//! `bas2wasm-lsp`: diagnostics and hover for `.bas` scripts over stdio.
//!
//! Editors launch it directly. Set `RUST_LOG=debug` and redirect stderr
//! to see each compile it runs:
//!
//! ```bash
//! RUST_LOG=debug bas2wasm-lsp 2>lsp.log
//! ```

use tower_lsp::{LspService, Server};

use bas2wasm::compiler::{BUILTIN_NAMES, HostFn};
use bas2wasm::lsp::BasLanguageServer;

#[tokio::main]
async fn main() {
    // stdout carries the protocol
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    log::info!(
        "bas2wasm-lsp {}: {} built-ins over {} host imports",
        env!("CARGO_PKG_VERSION"),
        BUILTIN_NAMES.len(),
        HostFn::ALL.len()
    );

    let (service, socket) = LspService::new(BasLanguageServer::new);
    Server::new(tokio::io::stdin(), tokio::io::stdout(), socket)
        .serve(service)
        .await;
    log::debug!("client closed the connection");
}
