// Infrastructure: storage, identifiers and security collaborators
pub mod associations;          // Typed edge table (sets and ordered lists)
pub mod database;              // SQLite pool and schema
pub mod id_generator;          // Time-ordered id generation
pub mod object_storage;        // Image blob storage
pub mod security;              // Credential hashing and tokens

pub use associations::AssocType;
pub use database::Database;
pub use id_generator::IdGenerator;
pub use object_storage::{ImageDescriptor, LocalObjectStorage, ObjectStorage};
pub use security::{Argon2PasswordHasher, Claims, JwtTokenIssuer, PasswordHasher, TokenIssuer};
