//! Container Builder: assemble a sealed MO2 container from raw code
//! bytes, serialized manifest bytes and an optional entry address.
//!
//! The whole output is built in one buffer; callers flush it with a
//! single write, so no partial container is ever observable on disk.

use crate::error::Mo2Error;
use crate::format::container::{
    align_up, ContainerLayout, Mo2Header, SegmentDescriptor, SegmentKind, ARCH_X86_64,
    HEADER_SIZE, MO2_MAGIC, MO2_VERSION, PF_R, PF_X, SEGMENT_SIZE,
};
use crate::seal::{seal, DIGEST_LEN};

/// Build a container with the default layout policy
/// (code at 0x400000, manifest at 0x500000, page-aligned offsets).
pub fn build(code: &[u8], manifest: &[u8], entry: Option<u64>) -> Result<Vec<u8>, Mo2Error> {
    build_with_layout(code, manifest, entry, &ContainerLayout::default())
}

/// Build a container with an explicit layout policy.
///
/// When `entry` is absent the code segment's virtual address is used, on
/// the convention that the entry symbol sits at the start of the code.
pub fn build_with_layout(
    code: &[u8],
    manifest: &[u8],
    entry: Option<u64>,
    layout: &ContainerLayout,
) -> Result<Vec<u8>, Mo2Error> {
    if !layout.page_align.is_power_of_two() || !layout.digest_align.is_power_of_two() {
        return Err(Mo2Error::UnsupportedFormat(
            "layout alignments must be powers of two".to_string(),
        ));
    }

    let table_end = (HEADER_SIZE + 2 * SEGMENT_SIZE) as u64;
    let code_off = align_up(table_end, layout.page_align);
    let manifest_off = align_up(code_off + code.len() as u64, layout.page_align);
    let hash_off = align_up(manifest_off + manifest.len() as u64, layout.digest_align);

    // the header stores these as u32
    for (label, value) in [
        ("manifest offset", manifest_off),
        ("manifest length", manifest.len() as u64),
        ("hash offset", hash_off),
    ] {
        if value > u32::MAX as u64 {
            return Err(Mo2Error::UnsupportedFormat(format!(
                "{} {:#x} exceeds the header's offset range",
                label, value
            )));
        }
    }

    let entry = entry.unwrap_or(layout.code_vaddr);
    log::debug!(
        "container layout: code @ {:#x} ({} bytes), manifest @ {:#x} ({} bytes), digest @ {:#x}",
        code_off,
        code.len(),
        manifest_off,
        manifest.len(),
        hash_off
    );

    let header = Mo2Header {
        magic: MO2_MAGIC,
        version: MO2_VERSION,
        arch: ARCH_X86_64,
        segment_count: 2,
        manifest_off: manifest_off as u32,
        manifest_len: manifest.len() as u32,
        hash_off: hash_off as u32,
        hash_len: DIGEST_LEN as u32,
        entry,
    };
    let seg_code = SegmentDescriptor {
        kind: SegmentKind::Code,
        flags: PF_R | PF_X,
        align: layout.page_align as u32,
        vaddr: layout.code_vaddr,
        file_off: code_off,
        file_size: code.len() as u64,
        mem_size: code.len() as u64,
        name_tag: "code".to_string(),
    };
    let seg_manifest = SegmentDescriptor {
        kind: SegmentKind::Manifest,
        flags: PF_R,
        align: layout.page_align as u32,
        vaddr: layout.manifest_vaddr,
        file_off: manifest_off,
        file_size: manifest.len() as u64,
        mem_size: manifest.len() as u64,
        name_tag: "manifest".to_string(),
    };

    let mut out = Vec::with_capacity(hash_off as usize + DIGEST_LEN);
    header.encode(&mut out);
    seg_code.encode(&mut out);
    seg_manifest.encode(&mut out);

    out.resize(code_off as usize, 0);
    out.extend_from_slice(code);
    out.resize(manifest_off as usize, 0);
    out.extend_from_slice(manifest);
    out.resize(hash_off as usize, 0);

    let digest = seal(&out);
    out.extend_from_slice(&digest);

    Ok(out)
}

/// A container's parsed header and segment table.
#[derive(Debug, Clone)]
pub struct ParsedContainer {
    pub header: Mo2Header,
    pub segments: Vec<SegmentDescriptor>,
}

/// Parse the header and segment table of a built container.
pub fn parse_container(data: &[u8]) -> Result<ParsedContainer, Mo2Error> {
    let header = Mo2Header::parse(data)?;
    let mut segments = Vec::with_capacity(header.segment_count as usize);
    for i in 0..header.segment_count as usize {
        segments.push(SegmentDescriptor::parse(data, HEADER_SIZE + i * SEGMENT_SIZE)?);
    }
    Ok(ParsedContainer { header, segments })
}

/// Check a container's structure and recompute its trailing digest.
pub fn verify(data: &[u8]) -> Result<(), Mo2Error> {
    let parsed = parse_container(data)?;
    let header = &parsed.header;

    if header.hash_len as usize != DIGEST_LEN {
        return Err(Mo2Error::UnsupportedFormat(format!(
            "unexpected digest length {}",
            header.hash_len
        )));
    }
    let hash_off = header.hash_off as usize;
    let total = hash_off + DIGEST_LEN;
    if data.len() < total {
        return Err(Mo2Error::InputTooSmall { needed: total, got: data.len() });
    }
    if data.len() != total {
        return Err(Mo2Error::UnsupportedFormat(format!(
            "trailing bytes after the digest ({} past expected length {})",
            data.len() - total,
            total
        )));
    }

    for seg in &parsed.segments {
        let end = seg.file_off.checked_add(seg.file_size);
        if end.is_none() || end.unwrap() > hash_off as u64 {
            return Err(Mo2Error::UnsupportedFormat(format!(
                "segment `{}` extends past the sealed region",
                seg.name_tag
            )));
        }
    }

    let expected = seal(&data[..hash_off]);
    if expected != data[hash_off..total] {
        return Err(Mo2Error::UnsupportedFormat(
            "integrity digest mismatch".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // nop, nop, ret
    const CODE: &[u8] = &[0x90, 0x90, 0xc3];
    const MANIFEST: &[u8] = b"{\"name\":\"x\"}";

    #[test]
    fn reference_scenario() {
        assert_eq!(MANIFEST.len(), 12);
        let out = build(CODE, MANIFEST, None).unwrap();
        let parsed = parse_container(&out).unwrap();

        assert_eq!(parsed.header.magic, MO2_MAGIC);
        assert_eq!(parsed.header.segment_count, 2);
        assert_eq!(parsed.header.entry, 0x40_0000);
        assert_eq!(parsed.segments[0].vaddr, 0x40_0000);
        assert_eq!(parsed.segments[1].vaddr, 0x50_0000);
        assert_eq!(out.len(), parsed.header.hash_off as usize + DIGEST_LEN);
    }

    #[test]
    fn offsets_are_aligned_and_monotonic() {
        let out = build(CODE, MANIFEST, None).unwrap();
        let parsed = parse_container(&out).unwrap();
        let code = &parsed.segments[0];
        let manifest = &parsed.segments[1];

        assert_eq!(code.file_off % 0x1000, 0);
        assert_eq!(manifest.file_off % 0x1000, 0);
        assert_eq!(parsed.header.hash_off % 32, 0);
        assert!(code.file_off + code.file_size <= manifest.file_off);
        assert!(manifest.file_off + manifest.file_size <= parsed.header.hash_off as u64);
        assert_eq!(&out[code.file_off as usize..][..CODE.len()], CODE);
        assert_eq!(&out[manifest.file_off as usize..][..MANIFEST.len()], MANIFEST);
    }

    #[test]
    fn digest_covers_the_prefix() {
        let out = build(CODE, MANIFEST, None).unwrap();
        let hash_off = parse_container(&out).unwrap().header.hash_off as usize;
        assert_eq!(seal(&out[..hash_off]), out[hash_off..]);
        verify(&out).unwrap();
    }

    #[test]
    fn build_is_deterministic() {
        let a = build(CODE, MANIFEST, Some(0x40_0010)).unwrap();
        let b = build(CODE, MANIFEST, Some(0x40_0010)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn explicit_entry_wins() {
        let out = build(CODE, MANIFEST, Some(0x40_0042)).unwrap();
        assert_eq!(parse_container(&out).unwrap().header.entry, 0x40_0042);
    }

    #[test]
    fn custom_layout_moves_segments() {
        let layout = crate::format::container::ContainerLayoutBuilder::new()
            .with_code_vaddr(0x10_0000)
            .with_manifest_vaddr(0x20_0000)
            .get();
        let out = build_with_layout(CODE, MANIFEST, None, &layout).unwrap();
        let parsed = parse_container(&out).unwrap();
        assert_eq!(parsed.header.entry, 0x10_0000);
        assert_eq!(parsed.segments[0].vaddr, 0x10_0000);
        assert_eq!(parsed.segments[1].vaddr, 0x20_0000);
        verify(&out).unwrap();
    }

    #[test]
    fn verify_rejects_a_flipped_bit() {
        let mut out = build(CODE, MANIFEST, None).unwrap();
        let code_off = parse_container(&out).unwrap().segments[0].file_off as usize;
        out[code_off] ^= 0x01;
        assert!(matches!(verify(&out), Err(Mo2Error::UnsupportedFormat(_))));
    }

    #[test]
    fn verify_rejects_truncation() {
        let out = build(CODE, MANIFEST, None).unwrap();
        let short = &out[..out.len() - 1];
        assert!(matches!(verify(short), Err(Mo2Error::InputTooSmall { .. })));
    }

    #[test]
    fn rejects_non_power_of_two_alignment() {
        let layout = crate::format::container::ContainerLayoutBuilder::new()
            .with_page_align(0x1001)
            .get();
        assert!(matches!(
            build_with_layout(CODE, MANIFEST, None, &layout),
            Err(Mo2Error::UnsupportedFormat(_))
        ));
    }
}
