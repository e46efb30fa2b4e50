use crate::key::ShuffleKey;
use crate::samples::Sample;
use crate::shuffle::KeyGroup;
use log::{debug, warn};
use noodles::sam;
use noodles::sam::alignment::io::Write as _;
use noodles::sam::alignment::RecordBuf;
use noodles::sam::header::record::value::map::header::tag as header_tag;
use noodles::sam::header::record::value::map::Header;
use noodles::sam::header::record::value::Map;
use rayon::prelude::*;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// `@HD` of the per-region outputs, whose records are written in coordinate order.
/// Keeps the aligner's version and extra fields; a missing `@HD` gets the default version.
fn coordinate_sorted_hd(aligner_hd: Option<&Map<Header>>) -> io::Result<Map<Header>> {
    match aligner_hd {
        Some(hd) => {
            let mut hd = hd.clone();
            let fields = hd.other_fields_mut();
            fields.shift_remove(&header_tag::GROUP_ORDER);
            fields.shift_remove(&header_tag::SUBSORT_ORDER);
            fields.insert(header_tag::SORT_ORDER, "coordinate".into());
            Ok(hd)
        }
        None => Map::<Header>::builder()
            .insert(header_tag::SORT_ORDER, String::from("coordinate"))
            .build()
            .map_err(io::Error::other),
    }
}

/// Header for the per-region outputs: the aligner's header marked coordinate-sorted,
/// plus one `@RG` entry per sample lane. Read groups already declared by the aligner
/// are kept as they are.
pub fn build_output_header(aligner_header: &sam::Header, samples: &[Sample]) -> io::Result<sam::Header> {
    let mut builder = sam::Header::builder().set_header(coordinate_sorted_hd(aligner_header.header())?);
    for (name, reference_sequence) in aligner_header.reference_sequences() {
        builder = builder.add_reference_sequence(name.as_slice(), reference_sequence.clone());
    }
    for (id, read_group) in aligner_header.read_groups() {
        builder = builder.add_read_group(id.as_slice(), read_group.clone());
    }
    for sample in samples {
        let id = sample.read_group_id();
        if aligner_header.read_groups().contains_key(id.as_bytes()) {
            warn!("Read group {id} is already declared by the aligner, keeping its entry");
            continue;
        }
        builder = builder.add_read_group(id.as_str(), sample.read_group()?);
    }
    for (id, program) in aligner_header.programs().as_ref() {
        builder = builder.add_program(id.as_slice(), program.clone());
    }
    for comment in aligner_header.comments() {
        builder = builder.add_comment(comment.clone());
    }
    Ok(builder.build())
}

fn write_group<K>(
    group: &KeyGroup<K, RecordBuf>,
    header: &sam::Header,
    output_dir: &Path,
) -> io::Result<PathBuf> {
    let path = output_dir.join(format!("{}.sam", group.region.output_name()));
    let file = File::create(&path).map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("Failed to create output file '{}': {e}", path.display()),
        )
    })?;

    let mut writer = sam::io::Writer::new(BufWriter::new(file));
    writer.write_header(header)?;
    for (_, record) in &group.entries {
        writer.write_alignment_record(header, record)?;
    }
    writer.get_mut().flush()?;

    debug!(
        "Wrote {} records for {} to {}",
        group.entries.len(),
        group.region,
        path.display()
    );
    Ok(path)
}

/// Write every group to `<output_dir>/<contig>-<start>-<end>.sam`, records in key order.
pub fn write_region_groups<K>(
    groups: &[KeyGroup<K, RecordBuf>],
    header: &sam::Header,
    output_dir: &Path,
) -> io::Result<Vec<PathBuf>>
where
    K: ShuffleKey + Sync,
{
    std::fs::create_dir_all(output_dir)?;
    groups
        .par_iter()
        .map(|group| write_group(group, header, output_dir))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::RegionKey;
    use crate::region::Region;
    use crate::sink::{AlignedRecordSink, Sink};
    use noodles::sam::header::record::value::map::header::Version;
    use std::io::Cursor;

    const ALIGNER_OUTPUT: &str = "@HD\tVN:1.6\tSO:unsorted\n\
@SQ\tSN:chr1\tLN:1000\n\
@RG\tID:7\tSM:existing\n\
@PG\tID:aligner\tPN:aligner\n\
r1\t0\tchr1\t100\t60\t4M\t*\t0\t0\tACGT\tIIII\n\
r2\t0\tchr1\t50\t60\t4M\t*\t0\t0\tACGT\tIIII\n";

    fn parse() -> (sam::Header, Vec<RecordBuf>) {
        let mut records = Vec::new();
        let mut sink = AlignedRecordSink::new(|record: crate::alignment_record::AlignedRecord| {
            records.push(record.into_record());
            Ok(())
        });
        sink.handle_stream(Cursor::new(ALIGNER_OUTPUT)).unwrap();
        let header = sink.into_header().unwrap();
        (header, records)
    }

    fn sample(lane: i32) -> Sample {
        Sample {
            external_sample_id: format!("s{lane}"),
            sequencer: "SEQ".to_string(),
            sequencing_start_date: 150101,
            run: 12,
            flowcell: "FC".to_string(),
            lane,
        }
    }

    #[test]
    fn test_build_output_header_adds_read_groups() {
        let (aligner_header, _) = parse();
        let header = build_output_header(&aligner_header, &[sample(1), sample(7)]).unwrap();

        assert_eq!(header.reference_sequences().len(), 1);
        assert_eq!(header.programs().as_ref().len(), 1);
        assert_eq!(header.read_groups().len(), 2);
        assert!(header.read_groups().contains_key(&b"1"[..]));
        // The aligner's own entry for lane 7 wins
        let existing = header.read_groups().get(&b"7"[..]).unwrap();
        assert_eq!(existing.other_fields().len(), 1);

        let hd = header.header().unwrap();
        assert_eq!(hd.version(), Version::new(1, 6));
        assert_eq!(
            hd.other_fields().get(&header_tag::SORT_ORDER).map(|v| v.to_vec()),
            Some(b"coordinate".to_vec())
        );
    }

    #[test]
    fn test_output_header_without_hd_is_coordinate_sorted() {
        let aligner_header = sam::Header::builder().build();
        let header = build_output_header(&aligner_header, &[]).unwrap();

        let hd = header.header().unwrap();
        assert_eq!(hd.version(), Version::new(1, 6));
        assert_eq!(
            hd.other_fields().get(&header_tag::SORT_ORDER).map(|v| v.to_vec()),
            Some(b"coordinate".to_vec())
        );
    }

    #[test]
    fn test_written_region_file_declares_coordinate_order() {
        let (header, records) = parse();
        let header = build_output_header(&header, &[]).unwrap();
        let region = Region::new("chr1", 1, 200).unwrap();
        let groups = vec![KeyGroup {
            region: region.clone(),
            entries: vec![(RegionKey::new(region, 100), records[0].clone())],
        }];

        let dir = tempfile::tempdir().unwrap();
        let paths = write_region_groups(&groups, &header, dir.path()).unwrap();
        let text = std::fs::read_to_string(&paths[0]).unwrap();
        assert!(text.starts_with("@HD\tVN:1.6\tSO:coordinate\n"), "{text}");
    }

    #[test]
    fn test_write_region_groups() {
        let (header, records) = parse();
        let region = Region::new("chr1", 1, 200).unwrap();
        let groups = vec![KeyGroup {
            region: region.clone(),
            entries: vec![
                (RegionKey::new(region.clone(), 50), records[1].clone()),
                (RegionKey::new(region.clone(), 100), records[0].clone()),
            ],
        }];

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("regions");
        let paths = write_region_groups(&groups, &header, &out).unwrap();
        assert_eq!(paths, vec![out.join("chr1-1-200.sam")]);

        let text = std::fs::read_to_string(&paths[0]).unwrap();
        let body: Vec<&str> = text.lines().filter(|l| !l.starts_with('@')).collect();
        assert_eq!(body.len(), 2);
        assert!(body[0].starts_with("r2\t"));
        assert!(body[1].starts_with("r1\t"));
    }
}
