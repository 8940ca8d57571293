// Models module - Database entity representations

pub mod admin_user;
pub mod badge;
pub mod checkin;
pub mod dds;
pub mod event;
pub mod lockup;
pub mod member;
pub mod qualification;
pub mod visitor;

pub use admin_user::{AdminRole, AdminUser};
pub use badge::{Badge, BadgeStatus};
pub use checkin::{Checkin, CheckoutMethod, PresentMember};
pub use dds::{DdsAssignment, DdsStatus};
pub use event::Event;
pub use lockup::{
    BuildingStatus, LockupAction, LockupCandidate, LockupReason, LockupSnapshot, LockupStatus,
    LockupTransfer, LockupWarning,
};
pub use member::{Member, MemberStatus, MemberSummary, MemberType};
pub use qualification::{MemberQualification, QualificationType};
pub use visitor::Visitor;
