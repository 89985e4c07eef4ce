use crate::common::*;

const LABEL_FILE: &str = "labels.csv";

#[derive(Debug, Clone)]
pub struct DatasetInit<P>
where
    P: AsRef<Path>,
{
    pub dir: P,
    pub c_dim: usize,
}

impl<P> DatasetInit<P>
where
    P: AsRef<Path>,
{
    pub async fn load(self) -> Result<Dataset> {
        let Self { dir, c_dim } = self;
        let dir = dir.as_ref().to_owned();
        let label_file = dir.join(LABEL_FILE);

        let mut reader = csv::Reader::from_path(&label_file)
            .with_context(|| format!("unable to open '{}'", label_file.display()))?;
        let records: Vec<csv::StringRecord> = reader.records().try_collect()?;

        let orig_num_entries = records.len();
        ensure!(orig_num_entries > 0, "empty dataset is not allowed");

        let entries: IndexMap<_, _> = records
            .iter()
            .enumerate()
            .map(|(index, record)| -> Result<_> {
                // the header takes the first line
                let line = index + 2;
                ensure!(
                    record.len() == c_dim + 1,
                    "line {} of '{}' has {} columns, but expect a file name and {} labels",
                    line,
                    label_file.display(),
                    record.len(),
                    c_dim
                );

                let file = record[0].trim().to_owned();
                let labels: Vec<f32> = record
                    .iter()
                    .skip(1)
                    .map(|field| match field.trim() {
                        "0" => Ok(0.0),
                        "1" => Ok(1.0),
                        other => Err(format_err!(
                            "invalid label '{}' at line {} of '{}'",
                            other,
                            line,
                            label_file.display()
                        )),
                    })
                    .try_collect()?;
                Ok((file, labels))
            })
            .try_collect()?;

        ensure!(
            entries.len() == orig_num_entries,
            "duplicated file name found in '{}'",
            label_file.display()
        );
        info!("{} images in '{}'", entries.len(), dir.display());

        {
            let dir = Arc::new(dir.clone());
            let files: Vec<_> = entries.keys().cloned().collect();

            stream::iter(files)
                .map(Ok)
                .try_par_for_each(None, move |file| {
                    let path = dir.join(file);
                    async move {
                        ensure!(path.is_file(), "'{}' is not a file", path.display());
                        Ok(())
                    }
                })
                .await?;
        }

        Ok(Dataset { dir, entries })
    }
}

/// Image files and their domain labels.
#[derive(Debug)]
pub struct Dataset {
    dir: PathBuf,
    entries: IndexMap<String, Vec<f32>>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The file name, path and labels of the `index`-th entry.
    pub fn get(&self, index: usize) -> Option<(&str, PathBuf, &[f32])> {
        let (file, labels) = self.entries.get_index(index)?;
        Some((file.as_str(), self.dir.join(file), labels.as_slice()))
    }

    /// A shuffled entry order that only depends on the seed and the epoch.
    pub fn epoch_order(&self, epoch: usize, seed: u64) -> Vec<usize> {
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(epoch as u64));
        let mut order: Vec<_> = (0..self.len()).collect();
        order.shuffle(&mut rng);
        order
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Writes `num` solid color images with alternating labels.
    pub(crate) fn write_demo_dataset(dir: &Path, num: usize, image_size: i64) -> Result<()> {
        fs::create_dir_all(dir)?;
        let mut writer = csv::Writer::from_path(dir.join(LABEL_FILE))?;
        writer.write_record(&["file", "smile", "frown"])?;

        for index in 0..num {
            let file = format!("{:04}.png", index);
            let value: i64 = if index % 2 == 0 { 64 } else { 192 };
            let image = Tensor::full(&[3, image_size, image_size], value, (Kind::Uint8, Device::Cpu));
            tch::vision::image::save(&image, dir.join(&file))?;

            let labels = if index % 2 == 0 { ["1", "0"] } else { ["0", "1"] };
            writer.write_record(&[file.as_str(), labels[0], labels[1]])?;
        }
        writer.flush()?;
        Ok(())
    }

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("expr-gan-{}-{}", name, std::process::id()))
    }

    #[tokio::test]
    async fn load_demo_dataset() -> Result<()> {
        let dir = scratch_dir("dataset");
        write_demo_dataset(&dir, 5, 8)?;

        let dataset = DatasetInit {
            dir: &dir,
            c_dim: 2,
        }
        .load()
        .await?;
        ensure!(dataset.len() == 5);

        let (file, path, labels) = dataset.get(1).ok_or_else(|| format_err!("missing entry"))?;
        ensure!(file == "0001.png");
        ensure!(path.is_file());
        ensure!(labels == [0.0, 1.0]);

        let mut order = dataset.epoch_order(3, 0);
        ensure!(order == dataset.epoch_order(3, 0));
        order.sort_unstable();
        ensure!(order == (0..5).collect::<Vec<_>>());

        // wrong label width
        ensure!(DatasetInit { dir: &dir, c_dim: 3 }.load().await.is_err());

        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[tokio::test]
    async fn missing_image_is_rejected() -> Result<()> {
        let dir = scratch_dir("dataset-missing");
        write_demo_dataset(&dir, 3, 8)?;
        fs::remove_file(dir.join("0002.png"))?;

        let result = DatasetInit { dir: &dir, c_dim: 2 }.load().await;
        ensure!(result.is_err());

        fs::remove_dir_all(&dir)?;
        Ok(())
    }
}
