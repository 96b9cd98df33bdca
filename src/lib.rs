pub mod client;
pub mod digest;
pub mod server;

/// Shared secret the test subscribers are provisioned with.
pub const DEFAULT_PASSWORD: &str = "7kkzTyGW";

/// Path of a subscriber's call list, relative to the server root.
pub fn call_list_path(dn: u64, domain: &str) -> String {
    format!("/org.projectclearwater.call-list/users/sip%3A{}%40{}/call-list.xml", dn, domain)
}

/// Digest username of a subscriber.
pub fn username(dn: u64, domain: &str) -> String {
    format!("{}@{}", dn, domain)
}
