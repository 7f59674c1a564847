use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use xxhash_rust::xxh3::{xxh3_64, Xxh3};

use crate::index::GenerationSnapshot;

/// 代际快照文件 Header
const MAGIC: u32 = 0xED6E_1D01;
const VERSION_CURRENT: u32 = 1;
const STATE_COMMITTED: u32 = 0x0000_0001;
const STATE_INCOMPLETE: u32 = 0xFFFF_FFFF;
const HEADER_SIZE: usize = 4 + 4 + 4 + 8 + 8; // magic + version + state + data_len + xxh3

/// 原子快照存储（atomic replacement）
///
/// 落盘分两段，便于调用方把"提交"放在自己的临界区里：
///
/// 暂存（`write_staged`）：
/// 1) 写 generation.next 的 INCOMPLETE header（len/checksum 先置 0）
/// 2) `bincode::serialize_into(file)` 流式写 body，边写边计算 xxh3 / data_len
/// 3) seek 回开头覆盖 COMMITTED header
/// 4) fsync(next)
///
/// 提交（`commit_staged`）：
/// 5) rename(next, target)：原子替换（POSIX 保证）
/// 6) fsync(dir)
///
/// 任何一步失败（含磁盘写满），target 仍是上一代快照；
/// 加载时校验 magic + version + state + data_len + checksum，任何不一致都拒绝。
pub struct SnapshotStore {
    path: PathBuf,
}

struct ChecksumWriter<'a, W: Write> {
    inner: &'a mut W,
    hasher: Xxh3,
    bytes: u64,
}

impl<'a, W: Write> ChecksumWriter<'a, W> {
    fn new(inner: &'a mut W) -> Self {
        Self {
            inner,
            hasher: Xxh3::new(),
            bytes: 0,
        }
    }

    fn finish(self) -> (u64, u64) {
        (self.bytes, self.hasher.digest())
    }
}

impl<'a, W: Write> Write for ChecksumWriter<'a, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

fn encode_header(state: u32, data_len: u64, checksum: u64) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&MAGIC.to_le_bytes());
    header[4..8].copy_from_slice(&VERSION_CURRENT.to_le_bytes());
    header[8..12].copy_from_slice(&state.to_le_bytes());
    header[12..20].copy_from_slice(&data_len.to_le_bytes());
    header[20..28].copy_from_slice(&checksum.to_le_bytes());
    header
}

impl SnapshotStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// 数据目录下的默认快照位置
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join("generation.db"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 加载快照（校验 magic/version/state/checksum）；任何不一致返回 None
    pub fn load_if_valid(&self) -> anyhow::Result<Option<GenerationSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let data = std::fs::read(&self.path)?;
        if data.len() < HEADER_SIZE {
            tracing::warn!("Snapshot too small, ignoring");
            return Ok(None);
        }

        let magic = u32::from_le_bytes(data[0..4].try_into()?);
        let version = u32::from_le_bytes(data[4..8].try_into()?);
        let state = u32::from_le_bytes(data[8..12].try_into()?);
        let data_len = u64::from_le_bytes(data[12..20].try_into()?) as usize;
        let stored_checksum = u64::from_le_bytes(data[20..28].try_into()?);

        if magic != MAGIC {
            tracing::warn!("Snapshot magic mismatch: {:#x} != {:#x}", magic, MAGIC);
            return Ok(None);
        }
        if version != VERSION_CURRENT {
            tracing::warn!(
                "Snapshot version mismatch: {} != {}",
                version,
                VERSION_CURRENT
            );
            return Ok(None);
        }
        if state != STATE_COMMITTED {
            tracing::warn!("Snapshot state INCOMPLETE, ignoring");
            return Ok(None);
        }

        let body = &data[HEADER_SIZE..];
        if body.len() != data_len {
            tracing::warn!("Snapshot data length mismatch");
            return Ok(None);
        }

        let computed = xxh3_64(body);
        if computed != stored_checksum {
            tracing::warn!(
                "Snapshot checksum mismatch: {:#x} != {:#x}",
                computed,
                stored_checksum
            );
            return Ok(None);
        }

        match bincode::deserialize::<GenerationSnapshot>(body) {
            Ok(snap) => Ok(Some(snap)),
            Err(e) => {
                tracing::warn!("Snapshot deserialize failed: {}", e);
                Ok(None)
            }
        }
    }

    /// 暂存文件位置（已 fsync、尚未替换 target）
    pub fn staged_path(&self) -> PathBuf {
        self.path.with_extension("next")
    }

    /// 一步完成暂存 + 提交
    pub fn write_atomic(&self, snap: &GenerationSnapshot) -> anyhow::Result<()> {
        self.write_staged(snap)?;
        self.commit_staged()
    }

    /// 写入并 fsync 暂存文件。失败时暂存文件被清理，target 不受影响。
    pub fn write_staged(&self, snap: &GenerationSnapshot) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let staged = self.staged_path();
        let data_len = match self.write_body(&staged, snap) {
            Ok(n) => n,
            Err(e) => {
                let _ = std::fs::remove_file(&staged);
                return Err(e);
            }
        };

        tracing::info!(
            "Snapshot staged: generation {} ({} terms), {} bytes",
            snap.id,
            snap.terms.len(),
            HEADER_SIZE as u64 + data_len
        );
        Ok(())
    }

    /// 用暂存文件原子替换 target；这是落盘的提交点
    pub fn commit_staged(&self) -> anyhow::Result<()> {
        std::fs::rename(self.staged_path(), &self.path)?;

        // fsync(dir)：确保目录项更新落盘
        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = std::fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }

    /// 丢弃暂存文件（不存在也不算错）
    pub fn discard_staged(&self) {
        let staged = self.staged_path();
        if let Err(e) = std::fs::remove_file(&staged) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove staged snapshot {:?}: {}", staged, e);
            }
        }
    }

    fn write_body(&self, path: &Path, snap: &GenerationSnapshot) -> anyhow::Result<u64> {
        let mut file = std::fs::File::create(path)?;
        file.write_all(&encode_header(STATE_INCOMPLETE, 0, 0))?;

        // 流式写 body：避免把整代序列化进一个巨型 Vec
        let (data_len, checksum) = {
            let mut buffered = std::io::BufWriter::new(&mut file);
            let (n, c) = {
                let mut cw = ChecksumWriter::new(&mut buffered);
                bincode::serialize_into(&mut cw, snap)?;
                cw.finish()
            };
            buffered.flush()?;
            (n, c)
        };

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&encode_header(STATE_COMMITTED, data_len, checksum))?;
        file.sync_all()?;
        Ok(data_len)
    }
}
