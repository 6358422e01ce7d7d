//! ejabberd XML-RPC backend (`ejabberd_xmlrpc` listener plus `mod_admin_extra`).

mod backend;
pub mod codec;

pub use backend::{EjabberdXmlRpcBackend, XmlRpcConfig, XmlRpcCredentials, DEFAULT_URI};
pub use codec::{CodecError, Value};
