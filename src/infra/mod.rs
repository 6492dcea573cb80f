pub mod document_store;
pub mod http_client;

pub use document_store::{FsDocumentStore, InMemoryDocumentStore};
pub use http_client::ReqwestHttp;
