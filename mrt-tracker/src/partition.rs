//! Input partitioning: turning the job's input files into map splits.

use anyhow::Result;
use tracing::info;

use common::InputFormat;

use crate::dfs::{Dfs, FileInfo};
use crate::pool::MapSplit;

/// Expands the input list on the DFS and cuts it into map splits according
/// to the input format. An empty result means the input does not exist.
pub(crate) async fn build_map_splits(
    dfs: &dyn Dfs,
    inputs: &[String],
    format: InputFormat,
    block_size: u64,
) -> Result<Vec<MapSplit>> {
    let files = expand_inputs(dfs, inputs).await?;
    match format {
        InputFormat::TextInput => Ok(split_by_size(&files, block_size)),
        InputFormat::NLineInput => split_by_line(dfs, &files).await,
    }
}

async fn expand_inputs(dfs: &dyn Dfs, inputs: &[String]) -> Result<Vec<FileInfo>> {
    let mut files = Vec::new();
    for input in inputs {
        info!("input file: {}", input);
        let children = if input.contains('*') {
            dfs.glob(input).await?
        } else {
            dfs.list(input).await?
        };
        files.extend(children.into_iter().filter(|file| !file.is_dir));
    }
    info!("input files total: {}", files.len());
    Ok(files)
}

fn split_by_size(files: &[FileInfo], block_size: u64) -> Vec<MapSplit> {
    let mut splits = Vec::new();
    for file in files {
        let blocks = file.size / block_size;
        for i in 0..blocks {
            splits.push(MapSplit {
                input_path: file.path.clone(),
                offset: i * block_size,
                length: block_size,
            });
        }
        let rest = file.size - blocks * block_size;
        // An exact multiple leaves no tail; an empty file still yields one
        // split so its presence reaches the map phase.
        if rest > 0 || blocks == 0 {
            splits.push(MapSplit {
                input_path: file.path.clone(),
                offset: blocks * block_size,
                length: rest,
            });
        }
    }
    splits
}

async fn split_by_line(dfs: &dyn Dfs, files: &[FileInfo]) -> Result<Vec<MapSplit>> {
    let mut splits = Vec::new();
    for file in files {
        let content = dfs.read(&file.path).await?;
        let mut lines: Vec<&[u8]> = content.split(|byte| *byte == b'\n').collect();
        if lines.last().map_or(false, |line| line.is_empty()) {
            lines.pop();
        }
        let mut offset = 0u64;
        for line in lines {
            let length = line.len() as u64 + 1;
            splits.push(MapSplit {
                input_path: file.path.clone(),
                offset,
                length,
            });
            offset += length;
        }
    }
    Ok(splits)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use bytes::Bytes;

    use crate::dfs::DfsWriter;

    use super::*;

    struct MemDfs {
        files: HashMap<String, Bytes>,
    }

    impl MemDfs {
        fn new(files: &[(&str, &str)]) -> Self {
            MemDfs {
                files: files
                    .iter()
                    .map(|(path, content)| (path.to_string(), Bytes::copy_from_slice(content.as_bytes())))
                    .collect(),
            }
        }

        fn infos<'a>(&self, matching: impl Iterator<Item = &'a String>) -> Vec<FileInfo> {
            let mut infos: Vec<FileInfo> = matching
                .map(|path| FileInfo {
                    path: path.clone(),
                    size: self.files[path].len() as u64,
                    is_dir: false,
                })
                .collect();
            infos.sort_by(|a, b| a.path.cmp(&b.path));
            infos
        }
    }

    #[async_trait]
    impl Dfs for MemDfs {
        async fn exist(&self, path: &str) -> Result<bool> {
            Ok(self.files.contains_key(path))
        }

        async fn remove(&self, _path: &str) -> Result<()> {
            Ok(())
        }

        async fn list(&self, path: &str) -> Result<Vec<FileInfo>> {
            Ok(self.infos(self.files.keys().filter(|key| key.starts_with(path))))
        }

        async fn glob(&self, pattern: &str) -> Result<Vec<FileInfo>> {
            let prefix = pattern.split('*').next().unwrap_or("");
            Ok(self.infos(self.files.keys().filter(|key| key.starts_with(prefix))))
        }

        async fn read(&self, path: &str) -> Result<Bytes> {
            self.files
                .get(path)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no such file: {}", path))
        }

        async fn open_write(&self, _path: &str) -> Result<Box<dyn DfsWriter>> {
            anyhow::bail!("read-only test dfs")
        }
    }

    #[tokio::test]
    async fn byte_ranges_cover_the_file_without_zero_tail() {
        let dfs = MemDfs::new(&[("/in/a", "0123456789")]);
        let inputs = vec!["/in/a".to_string()];
        let splits = build_map_splits(&dfs, &inputs, InputFormat::TextInput, 4)
            .await
            .expect("splits");
        assert_eq!(
            splits.iter().map(|s| (s.offset, s.length)).collect::<Vec<_>>(),
            vec![(0, 4), (4, 4), (8, 2)]
        );

        let exact = build_map_splits(&dfs, &inputs, InputFormat::TextInput, 5)
            .await
            .expect("splits");
        assert_eq!(
            exact.iter().map(|s| (s.offset, s.length)).collect::<Vec<_>>(),
            vec![(0, 5), (5, 5)]
        );
    }

    #[tokio::test]
    async fn empty_file_still_yields_one_split() {
        let dfs = MemDfs::new(&[("/in/empty", "")]);
        let splits = build_map_splits(
            &dfs,
            &["/in/empty".to_string()],
            InputFormat::TextInput,
            64,
        )
        .await
        .expect("splits");
        assert_eq!(splits.len(), 1);
        assert_eq!(splits[0].length, 0);
    }

    #[tokio::test]
    async fn wildcards_expand_over_the_listing() {
        let dfs = MemDfs::new(&[("/in/part-0", "aa"), ("/in/part-1", "bb"), ("/other", "cc")]);
        let splits = build_map_splits(
            &dfs,
            &["/in/part-*".to_string()],
            InputFormat::TextInput,
            64,
        )
        .await
        .expect("splits");
        let mut paths: Vec<&str> = splits.iter().map(|s| s.input_path.as_str()).collect();
        paths.dedup();
        assert_eq!(paths, vec!["/in/part-0", "/in/part-1"]);
    }

    #[tokio::test]
    async fn n_line_splits_track_line_offsets() {
        let dfs = MemDfs::new(&[("/in/lines", "one\ntwo\nlast")]);
        let splits = build_map_splits(
            &dfs,
            &["/in/lines".to_string()],
            InputFormat::NLineInput,
            64,
        )
        .await
        .expect("splits");
        assert_eq!(
            splits.iter().map(|s| (s.offset, s.length)).collect::<Vec<_>>(),
            vec![(0, 4), (4, 4), (8, 5)]
        );
    }
}
