//! Fixture builders shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::ops::Range;

/// Directory tree used to build RARC and U8 fixtures.
#[derive(Debug, Clone, Default)]
pub struct Dir {
    pub name:  String,
    pub files: Vec<(String, Vec<u8>)>,
    pub dirs:  Vec<Dir>,
}

impl Dir {
    pub fn new(name: &str) -> Self {
        Dir { name: name.to_owned(), ..Default::default() }
    }

    pub fn file(mut self, name: &str, data: impl Into<Vec<u8>>) -> Self {
        self.files.push((name.to_owned(), data.into()));
        self
    }

    pub fn dir(mut self, dir: Dir) -> Self {
        self.dirs.push(dir);
        self
    }
}

fn align(n: usize, to: usize) -> usize {
    n.div_ceil(to) * to
}

#[derive(Default)]
struct Strings {
    bytes:   Vec<u8>,
    offsets: HashMap<String, u32>,
}

impl Strings {
    fn add(&mut self, s: &str) -> u32 {
        if let Some(&o) = self.offsets.get(s) {
            return o;
        }
        let o = self.bytes.len() as u32;
        self.bytes.extend_from_slice(s.as_bytes());
        self.bytes.push(0);
        self.offsets.insert(s.to_owned(), o);
        o
    }
}

// ── RARC ─────────────────────────────────────────────────────────────────────

struct RarcEntry {
    id:          u16,
    name:        u32,
    data_offset: u32,
    size:        u32,
}

/// Assemble a RARC image.  Each directory lists its files, then links to its
/// subdirectories, then "." and "..".
pub fn build_rarc(root: &Dir) -> Vec<u8> {
    fn collect<'a>(d: &'a Dir, out: &mut Vec<(&'a Dir, Vec<usize>)>) -> usize {
        let index = out.len();
        out.push((d, Vec::new()));
        let kids = d.dirs.iter().map(|c| collect(c, out)).collect();
        out[index].1 = kids;
        index
    }
    let mut nodes = Vec::new();
    collect(root, &mut nodes);

    let mut strings = Strings::default();
    strings.add(".");
    strings.add("..");

    let mut entries: Vec<RarcEntry> = Vec::new();
    let mut node_records = Vec::new();
    let mut blob = Vec::new();
    let mut file_id = 0u16;

    for (index, (dir, kids)) in nodes.iter().enumerate() {
        let first = entries.len();
        for (name, data) in &dir.files {
            let offset = blob.len();
            blob.extend_from_slice(data);
            blob.resize(align(blob.len(), 0x20), 0);
            entries.push(RarcEntry {
                id:          file_id,
                name:        strings.add(name),
                data_offset: offset as u32,
                size:        data.len() as u32,
            });
            file_id += 1;
        }
        for &kid in kids {
            entries.push(RarcEntry {
                id:          0xFFFF,
                name:        strings.add(&nodes[kid].0.name),
                data_offset: kid as u32,
                size:        0x10,
            });
        }
        entries.push(RarcEntry { id: 0xFFFF, name: 0, data_offset: index as u32, size: 0x10 });
        entries.push(RarcEntry { id: 0xFFFF, name: 2, data_offset: 0xFFFF_FFFF, size: 0x10 });

        let tag = if index == 0 {
            *b"ROOT"
        } else {
            let mut t = *b"    ";
            for (slot, b) in t.iter_mut().zip(dir.name.to_ascii_uppercase().bytes()) {
                *slot = b;
            }
            t
        };
        node_records.push((tag, strings.add(&dir.name), (entries.len() - first) as u16, first as u32));
    }

    let node_table = 0x40;
    let file_table = align(node_table + nodes.len() * 0x10, 0x20);
    let string_table = align(file_table + entries.len() * 0x14, 0x20);
    let data_start = align(string_table + strings.bytes.len(), 0x20);
    let total = data_start + blob.len();

    let mut out = vec![0u8; total];
    let put32 = |out: &mut Vec<u8>, at: usize, v: u32| out[at..at + 4].copy_from_slice(&v.to_be_bytes());
    let put16 = |out: &mut Vec<u8>, at: usize, v: u16| out[at..at + 2].copy_from_slice(&v.to_be_bytes());

    out[..4].copy_from_slice(b"RARC");
    put32(&mut out, 0x04, total as u32);
    put32(&mut out, 0x08, 0x20);
    put32(&mut out, 0x0C, (data_start - 0x20) as u32);
    put32(&mut out, 0x10, blob.len() as u32);
    put32(&mut out, 0x14, blob.len() as u32);
    put32(&mut out, 0x20, nodes.len() as u32);
    put32(&mut out, 0x24, (node_table - 0x20) as u32);
    put32(&mut out, 0x28, entries.len() as u32);
    put32(&mut out, 0x2C, (file_table - 0x20) as u32);
    put32(&mut out, 0x30, strings.bytes.len() as u32);
    put32(&mut out, 0x34, (string_table - 0x20) as u32);

    for (i, (tag, name, count, first)) in node_records.iter().enumerate() {
        let at = node_table + i * 0x10;
        out[at..at + 4].copy_from_slice(tag);
        put32(&mut out, at + 4, *name);
        put16(&mut out, at + 0x0A, *count);
        put32(&mut out, at + 0x0C, *first);
    }
    for (i, e) in entries.iter().enumerate() {
        let at = file_table + i * 0x14;
        put16(&mut out, at, e.id);
        put16(&mut out, at + 4, if e.id == 0xFFFF { 0x0200 } else { 0x1100 });
        put16(&mut out, at + 6, e.name as u16);
        put32(&mut out, at + 8, e.data_offset);
        put32(&mut out, at + 0x0C, e.size);
    }
    out[string_table..string_table + strings.bytes.len()].copy_from_slice(&strings.bytes);
    out[data_start..].copy_from_slice(&blob);
    out
}

// ── U8 ───────────────────────────────────────────────────────────────────────

/// Assemble a U8 image.  The root's own name is ignored.
pub fn build_u8(root: &Dir) -> Vec<u8> {
    let mut strings = Strings::default();
    strings.add("");
    // (type, name, a, b); file `a` is patched once the data offset is known
    let mut nodes: Vec<(u8, u32, u32, u32)> = vec![(1, 0, 0, 0)];
    let mut payloads: Vec<(usize, Vec<u8>)> = Vec::new();

    fn walk(dir: &Dir, parent: usize, strings: &mut Strings, nodes: &mut Vec<(u8, u32, u32, u32)>, payloads: &mut Vec<(usize, Vec<u8>)>) {
        for (name, data) in &dir.files {
            payloads.push((nodes.len(), data.clone()));
            nodes.push((0, strings.add(name), 0, data.len() as u32));
        }
        for sub in &dir.dirs {
            let index = nodes.len();
            nodes.push((1, strings.add(&sub.name), parent as u32, 0));
            walk(sub, index, strings, nodes, payloads);
            nodes[index].3 = nodes.len() as u32;
        }
    }
    walk(root, 0, &mut strings, &mut nodes, &mut payloads);
    nodes[0].3 = nodes.len() as u32;

    let node_offset = 0x20;
    let node_size = nodes.len() * 12 + strings.bytes.len();
    let data_offset = align(node_offset + node_size, 0x20);

    let mut blob = Vec::new();
    for (index, data) in &payloads {
        nodes[*index].2 = (data_offset + blob.len()) as u32;
        blob.extend_from_slice(data);
        blob.resize(align(blob.len(), 0x20), 0);
    }

    let mut out = Vec::new();
    out.extend_from_slice(&0x55AA_382Du32.to_be_bytes());
    out.extend_from_slice(&(node_offset as u32).to_be_bytes());
    out.extend_from_slice(&(node_size as u32).to_be_bytes());
    out.extend_from_slice(&(data_offset as u32).to_be_bytes());
    out.resize(node_offset, 0xCC);
    for (kind, name, a, b) in &nodes {
        out.extend_from_slice(&(((*kind as u32) << 24) | name).to_be_bytes());
        out.extend_from_slice(&a.to_be_bytes());
        out.extend_from_slice(&b.to_be_bytes());
    }
    out.extend_from_slice(&strings.bytes);
    out.resize(data_offset, 0);
    out.extend_from_slice(&blob);
    out
}

// ── J3D ──────────────────────────────────────────────────────────────────────

/// Byte used for every payload byte of a J3D fixture.
pub const PAYLOAD_FILL: u8 = 0x11;

/// One block: tag, size, u32 fields, optional u16 count at 0x08, and the
/// block-relative payload window.
struct BlockLayout {
    tag:    &'static [u8; 4],
    size:   usize,
    fields: &'static [(usize, u32)],
    count:  Option<u16>,
    window: Range<usize>,
}

fn model_blocks() -> Vec<BlockLayout> {
    vec![
        BlockLayout { tag: b"INF1", size: 0x40, fields: &[(0x14, 0x18)], count: None, window: 0x18..0x40 },
        BlockLayout { tag: b"VTX1", size: 0x40, fields: &[(0x0C, 0x10)], count: None, window: 0x10..0x40 },
        BlockLayout { tag: b"EVP1", size: 0x40, fields: &[(0x18, 0x20)], count: None, window: 0x20..0x40 },
        BlockLayout { tag: b"DRW1", size: 0x30, fields: &[(0x10, 0x14)], count: None, window: 0x14..0x30 },
        BlockLayout { tag: b"JNT1", size: 0xC0, fields: &[(0x0C, 0x18)], count: Some(2), window: 0x18..0x98 },
        BlockLayout { tag: b"SHP1", size: 0x60, fields: &[(0x20, 0x30), (0x28, 0x50)], count: None, window: 0x30..0x50 },
        BlockLayout { tag: b"MAT3", size: 0x40, fields: &[(0x0C, 0x10)], count: None, window: 0x10..0x40 },
        BlockLayout { tag: b"TEX1", size: 0x80, fields: &[(0x0C, 0x20)], count: Some(1), window: 0x40..0x80 },
    ]
}

fn emit(out: &mut Vec<u8>, spec: &BlockLayout, windows: &mut Vec<Range<usize>>) {
    let at = out.len();
    let mut block = vec![0u8; spec.size];
    block[..4].copy_from_slice(spec.tag);
    block[4..8].copy_from_slice(&(spec.size as u32).to_be_bytes());
    for b in &mut block[spec.window.clone()] {
        *b = PAYLOAD_FILL;
    }
    if let Some(n) = spec.count {
        block[8..10].copy_from_slice(&n.to_be_bytes());
    }
    for &(field, value) in spec.fields {
        block[field..field + 4].copy_from_slice(&value.to_be_bytes());
    }
    out.extend_from_slice(&block);
    windows.push(at + spec.window.start..at + spec.window.end);
}

fn outer_header(magic: &[u8; 8], out: &mut Vec<u8>, blocks: u32) {
    out.extend_from_slice(magic);
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&blocks.to_be_bytes());
    out.resize(0x20, 0);
}

fn finish(out: &mut [u8]) {
    let len = out.len() as u32;
    out[8..12].copy_from_slice(&len.to_be_bytes());
}

/// Eight-block model.  With `with_mdl3`, an unknown `MDL3` block sits between
/// MAT3 and TEX1.  Returns the image and the absolute payload windows.
pub fn build_model(magic: &[u8; 8], with_mdl3: bool) -> (Vec<u8>, Vec<Range<usize>>) {
    let specs = model_blocks();
    let mut out = Vec::new();
    let mut windows = Vec::new();
    outer_header(magic, &mut out, specs.len() as u32 + with_mdl3 as u32);

    for spec in &specs {
        if with_mdl3 && spec.tag == b"TEX1" {
            let mut mdl = b"MDL3".to_vec();
            mdl.extend_from_slice(&0x20u32.to_be_bytes());
            mdl.resize(0x20, 0x5A);
            out.extend_from_slice(&mdl);
        }
        emit(&mut out, spec, &mut windows);
    }
    finish(&mut out);
    (out, windows)
}

/// Model whose blocks are emitted in the given order of canonical indices.
pub fn build_model_in_order(order: &[usize]) -> Vec<u8> {
    let specs = model_blocks();
    let mut out = Vec::new();
    let mut windows = Vec::new();
    outer_header(b"J3D2bmd3", &mut out, order.len() as u32);
    for &i in order {
        emit(&mut out, &specs[i], &mut windows);
    }
    finish(&mut out);
    out
}

/// Materials-only file.
pub fn build_materials() -> (Vec<u8>, Range<usize>) {
    let specs = model_blocks();
    let mut out = Vec::new();
    let mut windows = Vec::new();
    outer_header(b"J3D2bmt3", &mut out, 1);
    emit(&mut out, &specs[6], &mut windows);
    finish(&mut out);
    (out, windows.remove(0))
}
