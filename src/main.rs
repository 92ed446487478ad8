// Copyright 2025 the Formpane Authors
// SPDX-License-Identifier: Apache-2.0

//! Formpane: run a form session against a fixture document

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    formpane::run().await
}
