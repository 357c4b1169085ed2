// Copyright (c) 2024 Botho Foundation

//! Translation between middleware-level names and user-facing names.
//!
//! Topics carry a short prefix telling what kind of endpoint they belong to:
//!
//! | prefix | meaning          | example                     |
//! |--------|------------------|-----------------------------|
//! | `rt`   | topic            | `rt/chatter`                |
//! | `rq`   | service request  | `rq/add_two_intsRequest`    |
//! | `rr`   | service response | `rr/add_two_intsReply`      |
//!
//! Type names use the generated C++ spelling, e.g.
//! `std_msgs::msg::dds_::String_`, which demangles to `std_msgs/msg/String`.
//!
//! Every function returns `None` when the name does not belong to the
//! requested category, which drops it from a listing.

/// A name transformation used by graph queries.
pub type DemangleFn = fn(&str) -> Option<String>;

/// Prefix of plain topics.
pub const TOPIC_PREFIX: &str = "rt";
/// Prefix of service request topics.
pub const SERVICE_REQUEST_PREFIX: &str = "rq";
/// Prefix of service response topics.
pub const SERVICE_RESPONSE_PREFIX: &str = "rr";

const ROS_PREFIXES: [&str; 3] = [TOPIC_PREFIX, SERVICE_REQUEST_PREFIX, SERVICE_RESPONSE_PREFIX];

const TYPE_NAMESPACE_MARKER: &str = "dds_::";
const SERVICE_TYPE_SUFFIXES: [&str; 2] = ["_Request_", "_Response_"];

/// Which known prefix, if any, `name` starts with.
pub fn ros_prefix(name: &str) -> Option<&'static str> {
    ROS_PREFIXES
        .into_iter()
        .find(|prefix| strip_prefix(name, prefix).is_some())
}

// `rt/chatter` with prefix `rt` gives `/chatter`.
fn strip_prefix<'a>(name: &'a str, prefix: &str) -> Option<&'a str> {
    name.strip_prefix(prefix)
        .filter(|rest| rest.starts_with('/'))
}

/// Prefix a user-facing name, e.g. `/chatter` with `rt` gives `rt/chatter`.
pub fn mangle_topic(prefix: &str, name: &str) -> String {
    format!("{prefix}{name}")
}

/// Spell a message or service type the way the generated code does.
///
/// `std_msgs/msg/String` gives `std_msgs::msg::dds_::String_`; a name without
/// a namespace is returned unchanged.
pub fn mangle_type(type_name: &str) -> String {
    match type_name.rsplit_once('/') {
        Some((namespace, name)) => {
            format!(
                "{}::{TYPE_NAMESPACE_MARKER}{name}_",
                namespace.replace('/', "::")
            )
        }
        None => type_name.to_string(),
    }
}

/// Return the name unchanged.
pub fn identity(name: &str) -> Option<String> {
    Some(name.to_string())
}

/// Strip the topic prefix, dropping anything that is not a plain topic.
pub fn topic_from_dds(topic: &str) -> Option<String> {
    strip_prefix(topic, TOPIC_PREFIX).map(str::to_string)
}

/// Demangle a generated message type name, keeping unknown names unchanged.
pub fn type_from_dds(type_name: &str) -> Option<String> {
    if !type_name.ends_with('_') {
        return Some(type_name.to_string());
    }
    let Some(marker) = type_name.find(TYPE_NAMESPACE_MARKER) else {
        return Some(type_name.to_string());
    };

    let namespace = type_name[..marker].replace("::", "/");
    let name = &type_name[marker + TYPE_NAMESPACE_MARKER.len()..type_name.len() - 1];
    Some(format!("{namespace}{name}"))
}

/// Recover a service name from its request or response topic.
pub fn service_from_topic(topic: &str) -> Option<String> {
    let suffix = match ros_prefix(topic)? {
        SERVICE_REQUEST_PREFIX => "Request",
        SERVICE_RESPONSE_PREFIX => "Reply",
        _ => return None,
    };
    let prefix_len = SERVICE_REQUEST_PREFIX.len();
    topic[prefix_len..]
        .strip_suffix(suffix)
        .filter(|service| !service.is_empty() && *service != "/")
        .map(str::to_string)
}

/// Recover a service type from its request or response message type.
pub fn service_type_from_dds(type_name: &str) -> Option<String> {
    let marker = type_name.find(TYPE_NAMESPACE_MARKER)?;
    let start = marker + TYPE_NAMESPACE_MARKER.len();
    let end = SERVICE_TYPE_SUFFIXES
        .into_iter()
        .filter_map(|suffix| type_name.strip_suffix(suffix))
        .map(str::len)
        .find(|end| *end >= start)?;

    let namespace = type_name[..marker].replace("::", "/");
    Some(format!("{namespace}{}", &type_name[start..end]))
}
