use crate::sink::{LineHandler, LineSink, Sink, SinkError};
use log::debug;
use noodles::sam::header::record::value::map::read_group::tag as rg_tag;
use noodles::sam::header::record::value::map::ReadGroup;
use noodles::sam::header::record::value::Map;
use std::fs::File;
use std::io;

const PLATFORM: &str = "illumina";

/// One sequencing lane of a sample, as listed in the sample sheet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sample {
    pub external_sample_id: String,
    pub sequencer: String,
    pub sequencing_start_date: i32,
    pub run: i32,
    pub flowcell: String,
    pub lane: i32,
}

impl Sample {
    /// The lane number doubles as the read group identifier.
    pub fn read_group_id(&self) -> String {
        self.lane.to_string()
    }

    pub fn library(&self) -> String {
        format!(
            "{}_{}_{}_{}_L{}",
            self.sequencing_start_date, self.sequencer, self.run, self.flowcell, self.lane
        )
    }

    /// `@RG` header entry (without the ID, which is the map key).
    pub fn read_group(&self) -> io::Result<Map<ReadGroup>> {
        Map::<ReadGroup>::builder()
            .insert(rg_tag::PLATFORM, String::from(PLATFORM))
            .insert(rg_tag::LIBRARY, self.library())
            .insert(rg_tag::SAMPLE, self.external_sample_id.clone())
            .build()
            .map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Invalid read group for lane {}: {e}", self.lane),
                )
            })
    }
}

#[derive(Debug, Clone, Copy)]
struct Columns {
    external_sample_id: usize,
    sequencer: usize,
    sequencing_start_date: usize,
    run: usize,
    flowcell: usize,
    lane: usize,
}

#[derive(Default)]
struct SampleSheetHandler {
    columns: Option<Columns>,
    samples: Vec<Sample>,
    line: u64,
}

fn field<'a>(fields: &[&'a str], index: usize, name: &str) -> Result<&'a str, String> {
    fields
        .get(index)
        .map(|value| value.trim())
        .ok_or_else(|| format!("Missing value for column '{name}'"))
}

fn int_field(fields: &[&str], index: usize, name: &str) -> Result<i32, String> {
    let value = field(fields, index, name)?;
    value
        .parse()
        .map_err(|e| format!("Invalid value '{value}' for column '{name}': {e}"))
}

impl SampleSheetHandler {
    fn parse(&self, columns: Columns, line: &str) -> Result<Sample, String> {
        let fields: Vec<&str> = line.split(',').collect();
        Ok(Sample {
            external_sample_id: field(&fields, columns.external_sample_id, "externalSampleID")?
                .to_string(),
            sequencer: field(&fields, columns.sequencer, "sequencer")?.to_string(),
            sequencing_start_date: int_field(
                &fields,
                columns.sequencing_start_date,
                "sequencingStartDate",
            )?,
            run: int_field(&fields, columns.run, "run")?,
            flowcell: field(&fields, columns.flowcell, "flowcell")?.to_string(),
            lane: int_field(&fields, columns.lane, "lane")?,
        })
    }
}

impl LineHandler for SampleSheetHandler {
    fn header(&mut self, line: String) -> Result<(), SinkError> {
        self.line += 1;
        let mut found: [Option<usize>; 6] = [None; 6];
        for (i, name) in line.split(',').enumerate() {
            let slot = match name.trim().to_lowercase().as_str() {
                "externalsampleid" => 0,
                "sequencer" => 1,
                "sequencingstartdate" => 2,
                "run" => 3,
                "flowcell" => 4,
                "lane" => 5,
                _ => continue,
            };
            found[slot] = Some(i);
        }

        match found {
            [Some(a), Some(b), Some(c), Some(d), Some(e), Some(f)] => {
                self.columns = Some(Columns {
                    external_sample_id: a,
                    sequencer: b,
                    sequencing_start_date: c,
                    run: d,
                    flowcell: e,
                    lane: f,
                });
                Ok(())
            }
            _ => Err(SinkError::RecordParse {
                record: 0,
                message: format!(
                    "Sample sheet header must contain externalSampleID, sequencer, \
                     sequencingStartDate, run, flowcell and lane (got '{line}')"
                ),
            }),
        }
    }

    fn item(&mut self, line: String) -> Result<(), SinkError> {
        self.line += 1;
        if line.trim().is_empty() {
            return Ok(());
        }
        let columns = self.columns.ok_or_else(|| {
            SinkError::Rejected("Sample sheet row found before its header".to_string())
        })?;
        let sample = self
            .parse(columns, &line)
            .map_err(|message| SinkError::RecordParse {
                record: self.line,
                message,
            })?;
        self.samples.push(sample);
        Ok(())
    }
}

/// Read a comma-separated sample sheet with a header row. Column names are matched
/// case-insensitively and may appear in any order; other columns are ignored.
pub fn read_samples_from<R: io::Read>(reader: R) -> io::Result<Vec<Sample>> {
    let mut sink = LineSink::new(SampleSheetHandler::default());
    sink.handle_stream(reader)?;
    Ok(sink.into_handler().samples)
}

pub fn read_samples(path: &str) -> io::Result<Vec<Sample>> {
    let file = File::open(path).map_err(|e| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("Failed to open sample sheet '{path}': {e}"),
        )
    })?;
    let samples = read_samples_from(file)?;
    debug!("Read {} samples from {}", samples.len(), path);
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SHEET: &str = "internalSampleID,externalSampleID,project,sequencer,sequencingStartDate,run,flowcell,lane\n\
1,sample1,proj,SN163,150616,648,AHKYLMADXX,1\n\
2,sample2,proj,SN163,150616,648,AHKYLMADXX,2\n";

    #[test]
    fn test_read_samples() {
        let samples = read_samples_from(Cursor::new(SHEET)).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(
            samples[0],
            Sample {
                external_sample_id: "sample1".to_string(),
                sequencer: "SN163".to_string(),
                sequencing_start_date: 150616,
                run: 648,
                flowcell: "AHKYLMADXX".to_string(),
                lane: 1,
            }
        );
        assert_eq!(samples[1].read_group_id(), "2");
        assert_eq!(samples[1].library(), "150616_SN163_648_AHKYLMADXX_L2");
    }

    #[test]
    fn test_header_is_case_insensitive() {
        let sheet = "LANE,FlowCell,Run,SequencingStartDate,Sequencer,EXTERNALSAMPLEID\n3,FC,7,160101,SEQ,s3\n";
        let samples = read_samples_from(Cursor::new(sheet)).unwrap();
        assert_eq!(samples[0].lane, 3);
        assert_eq!(samples[0].external_sample_id, "s3");
    }

    #[test]
    fn test_missing_column_and_bad_value() {
        let missing = "externalSampleID,sequencer,run,flowcell,lane\n";
        assert!(read_samples_from(Cursor::new(missing)).is_err());

        let bad = "externalSampleID,sequencer,sequencingStartDate,run,flowcell,lane\ns,SEQ,x,1,FC,1\n";
        let err = read_samples_from(Cursor::new(bad)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("sequencingStartDate"));
    }

    #[test]
    fn test_read_group_fields() {
        let samples = read_samples_from(Cursor::new(SHEET)).unwrap();
        let read_group = samples[0].read_group().unwrap();
        let fields = read_group.other_fields();
        assert_eq!(fields.get(&rg_tag::PLATFORM).map(|v| v.to_string()), Some("illumina".to_string()));
        assert_eq!(
            fields.get(&rg_tag::LIBRARY).map(|v| v.to_string()),
            Some("150616_SN163_648_AHKYLMADXX_L1".to_string())
        );
        assert_eq!(fields.get(&rg_tag::SAMPLE).map(|v| v.to_string()), Some("sample1".to_string()));
    }
}
