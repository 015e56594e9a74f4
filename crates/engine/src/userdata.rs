//! Structured userdata recognition.
//!
//! The interpreter renders engine userdata as fixed textual forms
//! (`vmath.vector3(1, 2, 3)`, `hash: [foo]`, ...). Each form has an
//! independent parser; [`parse_description`] tries them in a fixed priority
//! order and the first match wins. Unmatched descriptions stay generic
//! userdata in the caller.

use regex::Regex;
use std::sync::OnceLock;

use crate::value::RValue;

/// Try every structured parser against a description, in priority order.
pub fn parse_description(desc: &str) -> Option<RValue> {
    const PARSERS: &[fn(&str) -> Option<RValue>] = &[
        parse_vector,
        parse_quat,
        parse_matrix4,
        parse_hash,
        parse_url,
        parse_message,
    ];
    let desc = desc.trim();
    PARSERS.iter().find_map(|parser| parser(desc))
}

fn vector_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^vmath\.vector([234])\((.*)\)$").unwrap())
}

/// `vmath.vector2/3/4(...)`. The component count must match the declared
/// dimension exactly, otherwise the parser declines.
fn parse_vector(desc: &str) -> Option<RValue> {
    let caps = vector_re().captures(desc)?;
    let dims: usize = caps[1].parse().ok()?;
    let components = parse_components(&caps[2])?;
    if components.len() != dims {
        return None;
    }
    Some(RValue::Vector(components))
}

fn quat_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^vmath\.quat\((.*)\)$").unwrap())
}

/// `vmath.quat(x, y, z, w)`, exactly four components.
fn parse_quat(desc: &str) -> Option<RValue> {
    let caps = quat_re().captures(desc)?;
    let components = parse_components(&caps[1])?;
    let quat: [f64; 4] = components.try_into().ok()?;
    Some(RValue::Quat(quat))
}

fn matrix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^vmath\.matrix4\((.*)\)$").unwrap())
}

/// `vmath.matrix4(...)`, exactly sixteen components, row-major.
fn parse_matrix4(desc: &str) -> Option<RValue> {
    let caps = matrix_re().captures(desc)?;
    let components = parse_components(&caps[1])?;
    let matrix: Box<[f64; 16]> = components.into_boxed_slice().try_into().ok()?;
    Some(RValue::Matrix(matrix))
}

fn hash_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^hash: \[(.*)\]$").unwrap())
}

/// `hash: [value]`.
fn parse_hash(desc: &str) -> Option<RValue> {
    let caps = hash_re().captures(desc)?;
    Some(RValue::Hash(caps[1].to_string()))
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^url: \[(.*)\]$").unwrap())
}

/// `url: [socket[:path][#fragment]]`.
fn parse_url(desc: &str) -> Option<RValue> {
    let caps = url_re().captures(desc)?;
    let inner = &caps[1];

    let (rest, fragment) = match inner.split_once('#') {
        Some((rest, frag)) => (rest, non_empty(frag)),
        None => (inner, None),
    };
    let (socket, path) = match rest.split_once(':') {
        Some((socket, path)) => (socket, non_empty(path)),
        None => (rest, None),
    };
    Some(RValue::Url {
        socket: socket.to_string(),
        path,
        fragment,
    })
}

fn message_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^msg: \[(.*)\]$").unwrap())
}

/// `msg: [id]`.
fn parse_message(desc: &str) -> Option<RValue> {
    let caps = message_re().captures(desc)?;
    Some(RValue::Message(caps[1].to_string()))
}

fn parse_components(list: &str) -> Option<Vec<f64>> {
    let list = list.trim();
    if list.is_empty() {
        return None;
    }
    list.split(',')
        .map(|c| c.trim().parse::<f64>().ok())
        .collect()
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
