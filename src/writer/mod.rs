//! PDF object serialization for appended revisions.

mod object_serializer;

pub use object_serializer::ObjectSerializer;
