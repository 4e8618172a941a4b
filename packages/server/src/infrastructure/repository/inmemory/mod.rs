//! InMemory collaborator implementations

pub mod identity;
pub mod meeting;
pub mod participant;

pub use identity::StaticIdentityResolver;
pub use meeting::InMemoryMeetingDirectory;
pub use participant::InMemoryParticipantRepository;
