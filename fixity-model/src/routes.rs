//! HTTP paths shared by the agent, the server router and its tests.

pub const HELLO: &str = "/hello";
/// Exact body served by [`HELLO`].
pub const HELLO_BODY: &str = "Hello";
pub const HEALTH: &str = "/healthz";
pub const INGEST: &str = "/ingest";
pub const MACHINES: &str = "/machines";
pub const NAMES: &str = "/names";

pub mod templates {
    pub const FILE_BY_SHA: &str = "/file/{sha256}";
    pub const MACHINE: &str = "/machine/{name}";
    pub const GRAPH: &str = "/graph/{sha256}";
}

pub fn file_by_sha(sha256: &str) -> String {
    format!("/file/{sha256}")
}

pub fn machine(name: &str) -> String {
    format!("/machine/{name}")
}

pub fn graph(sha256: &str) -> String {
    format!("/graph/{sha256}")
}
