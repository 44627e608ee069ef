//! Wire-protocol primitives for the BDM probe (C2): command framing,
//! response validation, and the primitive operations needed to drive
//! BDM (memory/register access, bulk upload, mode transitions, GO).

pub mod builder;
pub mod consts;
mod ops;
pub mod response;

pub use builder::CommandBuilder;
pub use consts::debug_register_write_code;
pub use ops::Bdm;
pub use response::ResponseKind;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] bdm_transport::Error),
    #[error("bad response magic {got:02x?}")]
    BadMagic { got: [u8; 2] },
    #[error("bad response status byte {status:#04x}")]
    BadStatus { status: u8 },
    #[error("response too short ({got} bytes)")]
    ShortResponse { got: usize },
}
