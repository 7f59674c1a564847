use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use xxhash_rust::xxh3::xxh3_64;

use crate::core::WordsBatch;

const JOURNAL_MAGIC: u32 = 0x3153_4457; // "WDS1"
const JOURNAL_VERSION: u32 = 1;
const HEADER_LEN: u64 = 8;
const FRAME_HEADER_LEN: usize = 4 + 8; // len:u32 + xxh3:u64

#[derive(Clone, Debug, Default)]
pub struct JournalReplay {
    pub batches: Vec<WordsBatch>,
    pub truncated_tail_records: usize,
    /// 最后一条完整记录之后的偏移；其后的字节都是残帧
    pub valid_end: u64,
}

/// 摄入日志：`PUT words` 的批次先追加到这里再进入 staging。
///
/// 记录格式：`len:u32 | xxh3:u64 | bincode(WordsBatch)`。
/// reindex 的输入是"当前所有已摄入数据"，因此日志跨重启保留，启动时整体回放。
/// 打开时若发现残尾，先截断到最后一条完整记录，再允许追加。
pub struct WordsJournal {
    path: PathBuf,
    file: Mutex<File>,
}

impl WordsJournal {
    pub fn open_in_dir(dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("words.journal");
        let f = open_or_init(&path)?;

        let scan = read_journal_file(&path)?;
        let len = f.metadata()?.len();
        if scan.valid_end < len {
            tracing::warn!(
                "Words journal has {} damaged byte(s) after offset {}, truncating",
                len - scan.valid_end,
                scan.valid_end
            );
            f.set_len(scan.valid_end)?;
            f.sync_all()?;
        }

        Ok(Self {
            path,
            file: Mutex::new(f),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, batch: &WordsBatch) -> anyhow::Result<()> {
        let frame = encode_frame(batch)?;
        let mut f = self.file.lock();
        f.write_all(&frame)?;
        f.flush()?;
        Ok(())
    }

    /// 回放全部批次；损坏/截断的尾部记录被跳过并计数
    pub fn replay(&self) -> anyhow::Result<JournalReplay> {
        let _g = self.file.lock();
        read_journal_file(&self.path)
    }

    /// 用给定批次整体替换日志（tmp + fsync + rename），用于压缩
    pub fn rewrite(&self, batches: &[Arc<WordsBatch>]) -> anyhow::Result<()> {
        let mut guard = self.file.lock();
        let tmp_path = self.path.with_extension("journal.tmp");

        let written = (|| -> anyhow::Result<()> {
            let tmp = File::create(&tmp_path)?;
            let mut w = BufWriter::new(&tmp);
            w.write_all(&JOURNAL_MAGIC.to_le_bytes())?;
            w.write_all(&JOURNAL_VERSION.to_le_bytes())?;
            for batch in batches {
                w.write_all(&encode_frame(batch)?)?;
            }
            w.flush()?;
            drop(w);
            tmp.sync_all()?;
            Ok(())
        })();
        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e);
        }

        std::fs::rename(&tmp_path, &self.path)?;
        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        *guard = OpenOptions::new().read(true).append(true).open(&self.path)?;
        Ok(())
    }
}

fn encode_frame(batch: &WordsBatch) -> anyhow::Result<Vec<u8>> {
    let payload = bincode::serialize(batch)?;
    let len: u32 = payload
        .len()
        .try_into()
        .map_err(|_| anyhow::anyhow!("words batch too large ({} bytes)", payload.len()))?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&xxh3_64(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

fn write_header(path: &Path) -> anyhow::Result<File> {
    let mut f = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    f.write_all(&JOURNAL_MAGIC.to_le_bytes())?;
    f.write_all(&JOURNAL_VERSION.to_le_bytes())?;
    f.flush()?;
    drop(f);
    Ok(OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?)
}

fn open_or_init(path: &Path) -> anyhow::Result<File> {
    if !path.exists() {
        return write_header(path);
    }

    let mut f = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?;

    let mut hdr = [0u8; 8];
    f.seek(SeekFrom::Start(0))?;
    if f.read_exact(&mut hdr).is_err() {
        // 空文件/截断：重写 header
        return write_header(path);
    }

    let magic = u32::from_le_bytes(hdr[0..4].try_into()?);
    let ver = u32::from_le_bytes(hdr[4..8].try_into()?);
    if magic != JOURNAL_MAGIC || ver != JOURNAL_VERSION {
        // 不认识的文件不覆盖：改名留档后重新开始
        let aside = path.with_extension("journal.unknown");
        tracing::warn!(
            "Journal header mismatch (magic={:#x} version={}), moving aside to {:?}",
            magic,
            ver,
            aside
        );
        drop(f);
        std::fs::rename(path, &aside)?;
        return write_header(path);
    }

    Ok(f)
}

fn read_journal_file(path: &Path) -> anyhow::Result<JournalReplay> {
    if !path.exists() {
        return Ok(JournalReplay::default());
    }
    let mut f = BufReader::new(File::open(path)?);

    let mut hdr = [0u8; 8];
    if f.read_exact(&mut hdr).is_err() {
        return Ok(JournalReplay::default());
    }
    let magic = u32::from_le_bytes(hdr[0..4].try_into()?);
    let ver = u32::from_le_bytes(hdr[4..8].try_into()?);
    if magic != JOURNAL_MAGIC || ver != JOURNAL_VERSION {
        return Ok(JournalReplay::default());
    }

    let mut out = JournalReplay {
        valid_end: HEADER_LEN,
        ..Default::default()
    };
    loop {
        let mut fh = [0u8; FRAME_HEADER_LEN];
        match f.read_exact(&mut fh) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                // 恰好在帧边界结束是正常 EOF；否则是半个帧头
                if f.stream_position()? > out.valid_end {
                    out.truncated_tail_records += 1;
                }
                break;
            }
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(fh[0..4].try_into()?) as usize;
        let checksum = u64::from_le_bytes(fh[4..12].try_into()?);
        let mut buf = vec![0u8; len];
        if f.read_exact(&mut buf).is_err() {
            out.truncated_tail_records += 1;
            break;
        }
        if xxh3_64(&buf) != checksum {
            // 校验失败：视为截断/损坏，停止读取（保守）
            out.truncated_tail_records += 1;
            break;
        }
        match bincode::deserialize::<WordsBatch>(&buf) {
            Ok(batch) => {
                out.batches.push(batch);
                out.valid_end += (FRAME_HEADER_LEN + len) as u64;
            }
            Err(e) => {
                tracing::warn!("Journal record undecodable, stopping replay: {}", e);
                out.truncated_tail_records += 1;
                break;
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DocumentRecord, RankingMetadata};

    fn unique_tmp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("edge-index-journal-{}-{}", tag, nanos))
    }

    fn batch(id: u64) -> WordsBatch {
        WordsBatch::new(
            id,
            vec![DocumentRecord::new(id * 10, 1).word("cat", RankingMetadata::new(1))],
        )
    }

    fn ids(r: &JournalReplay) -> Vec<u64> {
        r.batches.iter().map(|b| b.batch_id).collect()
    }

    #[test]
    fn append_then_replay_survives_reopen() {
        let dir = unique_tmp_dir("basic");
        {
            let j = WordsJournal::open_in_dir(&dir).unwrap();
            j.append(&batch(1)).unwrap();
            j.append(&batch(2)).unwrap();
        }
        let j = WordsJournal::open_in_dir(&dir).unwrap();
        let r = j.replay().unwrap();
        assert_eq!(r.batches.len(), 2);
        assert_eq!(r.batches[1], batch(2));
        assert_eq!(r.truncated_tail_records, 0);
        assert_eq!(r.valid_end, std::fs::metadata(j.path()).unwrap().len());
    }

    #[test]
    fn torn_tail_is_skipped() {
        let dir = unique_tmp_dir("torn");
        let j = WordsJournal::open_in_dir(&dir).unwrap();
        j.append(&batch(1)).unwrap();
        j.append(&batch(2)).unwrap();

        let bytes = std::fs::read(j.path()).unwrap();
        std::fs::write(j.path(), &bytes[..bytes.len() - 3]).unwrap();

        let r = j.replay().unwrap();
        assert_eq!(r.batches, vec![batch(1)]);
        assert_eq!(r.truncated_tail_records, 1);
    }

    #[test]
    fn appends_after_torn_tail_survive_restart() {
        let dir = unique_tmp_dir("torn-reopen");
        {
            let j = WordsJournal::open_in_dir(&dir).unwrap();
            j.append(&batch(1)).unwrap();
            j.append(&batch(2)).unwrap();
            let bytes = std::fs::read(j.path()).unwrap();
            std::fs::write(j.path(), &bytes[..bytes.len() - 3]).unwrap();
        }
        {
            // 重启：残尾被截掉，新批次接在最后一条完整记录之后
            let j = WordsJournal::open_in_dir(&dir).unwrap();
            assert_eq!(ids(&j.replay().unwrap()), vec![1]);
            j.append(&batch(3)).unwrap();
        }
        let j = WordsJournal::open_in_dir(&dir).unwrap();
        let r = j.replay().unwrap();
        assert_eq!(ids(&r), vec![1, 3]);
        assert_eq!(r.truncated_tail_records, 0);
    }

    #[test]
    fn half_written_frame_header_is_truncated() {
        let dir = unique_tmp_dir("half-header");
        {
            let j = WordsJournal::open_in_dir(&dir).unwrap();
            j.append(&batch(1)).unwrap();
        }
        let path = dir.join("words.journal");
        let mut bytes = std::fs::read(&path).unwrap();
        let clean = bytes.len() as u64;
        bytes.extend_from_slice(&[7, 0, 0]);
        std::fs::write(&path, &bytes).unwrap();

        let j = WordsJournal::open_in_dir(&dir).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), clean);
        j.append(&batch(2)).unwrap();
        assert_eq!(ids(&j.replay().unwrap()), vec![1, 2]);
    }

    #[test]
    fn corrupted_checksum_stops_replay() {
        let dir = unique_tmp_dir("crc");
        let j = WordsJournal::open_in_dir(&dir).unwrap();
        j.append(&batch(1)).unwrap();
        j.append(&batch(2)).unwrap();

        let mut bytes = std::fs::read(j.path()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(j.path(), &bytes).unwrap();

        let r = j.replay().unwrap();
        assert_eq!(ids(&r), vec![1]);
        assert_eq!(r.truncated_tail_records, 1);
    }

    #[test]
    fn rewrite_replaces_contents_and_keeps_appending() {
        let dir = unique_tmp_dir("rewrite");
        let j = WordsJournal::open_in_dir(&dir).unwrap();
        for id in 1..=4 {
            j.append(&batch(id)).unwrap();
        }
        j.rewrite(&[Arc::new(batch(9))]).unwrap();
        j.append(&batch(10)).unwrap();
        assert_eq!(ids(&j.replay().unwrap()), vec![9, 10]);
        assert!(!dir.join("words.journal.tmp").exists());

        drop(j);
        let j = WordsJournal::open_in_dir(&dir).unwrap();
        assert_eq!(ids(&j.replay().unwrap()), vec![9, 10]);
    }

    #[test]
    fn foreign_file_is_moved_aside() {
        let dir = unique_tmp_dir("foreign");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("words.journal"), b"not a journal at all").unwrap();

        let j = WordsJournal::open_in_dir(&dir).unwrap();
        assert!(j.replay().unwrap().batches.is_empty());
        assert!(dir.join("words.journal.unknown").exists());
        j.append(&batch(3)).unwrap();
        assert_eq!(j.replay().unwrap().batches, vec![batch(3)]);
    }
}
