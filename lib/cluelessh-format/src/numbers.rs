//! SSH message-type and disconnect-reason constants.
//!
//! <https://www.iana.org/assignments/ssh-parameters/ssh-parameters.xhtml>

pub const SSH_MSG_DISCONNECT: u8 = 1;
pub const SSH_MSG_IGNORE: u8 = 2;
pub const SSH_MSG_UNIMPLEMENTED: u8 = 3;
pub const SSH_MSG_DEBUG: u8 = 4;
pub const SSH_MSG_SERVICE_REQUEST: u8 = 5;
pub const SSH_MSG_SERVICE_ACCEPT: u8 = 6;
pub const SSH_MSG_EXT_INFO: u8 = 7;

pub const SSH_MSG_KEXINIT: u8 = 20;
pub const SSH_MSG_NEWKEYS: u8 = 21;

pub const SSH_MSG_KEX_ECDH_INIT: u8 = 30;
pub const SSH_MSG_KEX_ECDH_REPLY: u8 = 31;

pub const SSH_MSG_USERAUTH_REQUEST: u8 = 50;

pub const SSH_DISCONNECT_PROTOCOL_ERROR: u32 = 2;
pub const SSH_DISCONNECT_KEY_EXCHANGE_FAILED: u32 = 3;
pub const SSH_DISCONNECT_MAC_ERROR: u32 = 5;
pub const SSH_DISCONNECT_SERVICE_NOT_AVAILABLE: u32 = 7;
pub const SSH_DISCONNECT_PROTOCOL_VERSION_NOT_SUPPORTED: u32 = 8;
pub const SSH_DISCONNECT_HOST_KEY_NOT_VERIFIABLE: u32 = 9;
pub const SSH_DISCONNECT_CONNECTION_LOST: u32 = 10;
pub const SSH_DISCONNECT_BY_APPLICATION: u32 = 11;
pub const SSH_DISCONNECT_ILLEGAL_USER_NAME: u32 = 15;

pub fn packet_type_to_string(packet_type: u8) -> &'static str {
    match packet_type {
        SSH_MSG_DISCONNECT => "SSH_MSG_DISCONNECT",
        SSH_MSG_IGNORE => "SSH_MSG_IGNORE",
        SSH_MSG_UNIMPLEMENTED => "SSH_MSG_UNIMPLEMENTED",
        SSH_MSG_DEBUG => "SSH_MSG_DEBUG",
        SSH_MSG_SERVICE_REQUEST => "SSH_MSG_SERVICE_REQUEST",
        SSH_MSG_SERVICE_ACCEPT => "SSH_MSG_SERVICE_ACCEPT",
        SSH_MSG_EXT_INFO => "SSH_MSG_EXT_INFO",
        SSH_MSG_KEXINIT => "SSH_MSG_KEXINIT",
        SSH_MSG_NEWKEYS => "SSH_MSG_NEWKEYS",
        SSH_MSG_KEX_ECDH_INIT => "SSH_MSG_KEX_ECDH_INIT",
        SSH_MSG_KEX_ECDH_REPLY => "SSH_MSG_KEX_ECDH_REPLY",
        SSH_MSG_USERAUTH_REQUEST => "SSH_MSG_USERAUTH_REQUEST",
        _ => "SSH_MSG_UNKNOWN",
    }
}

pub fn disconnect_reason_to_string(reason: u32) -> &'static str {
    match reason {
        SSH_DISCONNECT_PROTOCOL_ERROR => "SSH_DISCONNECT_PROTOCOL_ERROR",
        SSH_DISCONNECT_KEY_EXCHANGE_FAILED => "SSH_DISCONNECT_KEY_EXCHANGE_FAILED",
        SSH_DISCONNECT_MAC_ERROR => "SSH_DISCONNECT_MAC_ERROR",
        SSH_DISCONNECT_SERVICE_NOT_AVAILABLE => "SSH_DISCONNECT_SERVICE_NOT_AVAILABLE",
        SSH_DISCONNECT_PROTOCOL_VERSION_NOT_SUPPORTED => {
            "SSH_DISCONNECT_PROTOCOL_VERSION_NOT_SUPPORTED"
        }
        SSH_DISCONNECT_HOST_KEY_NOT_VERIFIABLE => "SSH_DISCONNECT_HOST_KEY_NOT_VERIFIABLE",
        SSH_DISCONNECT_CONNECTION_LOST => "SSH_DISCONNECT_CONNECTION_LOST",
        SSH_DISCONNECT_BY_APPLICATION => "SSH_DISCONNECT_BY_APPLICATION",
        SSH_DISCONNECT_ILLEGAL_USER_NAME => "SSH_DISCONNECT_ILLEGAL_USER_NAME",
        _ => "SSH_DISCONNECT_UNKNOWN",
    }
}
