pub mod codec;
pub mod registry;
pub mod value;

pub use codec::{Compressor, Serializer};
pub use registry::SerializerRegistry;
pub use value::RpcValue;
