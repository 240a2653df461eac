//! Request encoding.
//!
//! Every request goes out as an array of bulk strings, so arguments are
//! binary safe:
//!
//! ```text
//! *3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n
//! ```

use itoa::Buffer;

/// Worst-case framing around one argument: `$`, up to 20 length digits and
/// two CRLFs.
const ARG_OVERHEAD: usize = 1 + 20 + 2 + 2;

/// Framing of the `*N` header.
const HEADER_LEN: usize = 1 + 20 + 2;

/// Append the encoding of one command to `buf`.
pub fn encode_into<A: AsRef<[u8]>>(buf: &mut Vec<u8>, args: &[A]) {
    let mut digits = Buffer::new();
    header(buf, &mut digits, b'*', args.len());
    for arg in args.iter().map(AsRef::as_ref) {
        header(buf, &mut digits, b'$', arg.len());
        buf.extend_from_slice(arg);
        buf.extend_from_slice(b"\r\n");
    }
}

/// `<tag><n>\r\n`
fn header(buf: &mut Vec<u8>, digits: &mut Buffer, tag: u8, n: usize) {
    buf.push(tag);
    buf.extend_from_slice(digits.format(n).as_bytes());
    buf.extend_from_slice(b"\r\n");
}

/// Upper bound on the encoded size of `args`.
pub fn encoded_len<A: AsRef<[u8]>>(args: &[A]) -> usize {
    args.iter()
        .fold(HEADER_LEN, |n, a| n + a.as_ref().len() + ARG_OVERHEAD)
}

pub fn encode_command<A: AsRef<[u8]>>(args: &[A]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(encoded_len(args));
    encode_into(&mut buf, args);
    buf
}

/// Concatenate several commands so a batch leaves in one write.
pub fn encode_pipeline<'a, A, I>(commands: I) -> Vec<u8>
where
    A: AsRef<[u8]> + 'a,
    I: IntoIterator<Item = &'a [A]>,
{
    let mut buf = Vec::new();
    for args in commands {
        buf.reserve(encoded_len(args));
        encode_into(&mut buf, args);
    }
    buf
}

// ── Tests ──────────────────────────────────────────────────────────
