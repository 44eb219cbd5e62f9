use boxfetch::catalog::Catalog;
use boxfetch::media::ReleaseNameClassifier;
use boxfetch::{ItemKey, Listing, MediaType, UnpackProgressParser};
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::path::PathBuf;

const BOX1: &str = "\
1623879181.75 | 4025725826 | /home/u/files/Show.S04.1080p.WEB.H264-GRP/Show.S04E02.iNTERNAL.1080p.WEB.H264-GRP.mkv
1623800000.10 | 1048576 | /home/u/files/Show.S04.1080p.WEB.H264-GRP/Sample/show.s04e02.sample.mkv
1623700000.00 | 99000000 | /home/u/files/Some.Movie.2019.1080p.BluRay-GRP/some.movie.part01.rar
1623700000.00 | 99000000 | /home/u/files/Some.Movie.2019.1080p.BluRay-GRP/some.movie.part02.rar
1623700000.00 | 99000000 | /home/u/files/Some.Movie.2019.1080p.BluRay-GRP/Subs/some.movie.subs.rar
find: '/home/u/files/private': Permission denied
";

const BOX2: &str = "\
1623900000 | 734003200 | /srv/dl/files/Other.Movie.2020.720p-GRP/Other.Movie.2020.720p-GRP.mkv
1623600000 | 12 | /home/u/files/not/this/host.mkv
";

#[test]
fn listing_across_hosts() {
    let mut listing = Listing::new();
    listing.ingest(BOX1.lines(), "box1", "/home/u/files");
    listing.ingest(BOX2.lines(), "box2", "/srv/dl/files");
    listing.sort();
    listing.sort();

    let rows: Vec<(usize, &str, &str)> = listing
        .iter()
        .map(|i| (i.index().unwrap(), i.host(), i.name()))
        .collect();
    assert_eq!(
        rows,
        vec![
            (1, "box1", "some.movie.part01.rar"),
            (2, "box1", "Show.S04E02.iNTERNAL.1080p.WEB.H264-GRP.mkv"),
            (3, "box2", "Other.Movie.2020.720p-GRP.mkv"),
        ]
    );

    let catalog: HashSet<String> = ["other.movie.2020.720p-grp".to_string()]
        .into_iter()
        .collect();
    listing.reconcile(&[Box::new(catalog) as Box<dyn Catalog>]);
    assert!(listing.get(&ItemKey::Index(3)).unwrap().is_downloaded());
    assert!(!listing.get(&ItemKey::Index(1)).unwrap().is_downloaded());

    let classifier = ReleaseNameClassifier::new(PathBuf::from("/none/m"), PathBuf::from("/none/tv"));
    let episode = listing
        .get(&"Show.S04E02.iNTERNAL.1080p.WEB.H264-GRP.mkv".into())
        .unwrap();
    assert_eq!(episode.media_type(&classifier), MediaType::Episode);
    assert_eq!(episode.parent_name(), "Show.S04.1080p.WEB.H264-GRP");
    assert_eq!(
        listing.get(&ItemKey::Index(1)).unwrap().media_type(&classifier),
        MediaType::Movie
    );
}

#[test]
fn parser_tracks_single_volume_extraction() {
    let transcript = [
        "",
        "UNRAR 5.61 beta 1 freeware      Copyright (c) 1993-2018 Alexander Roshal",
        "",
        "Extracting from /home/u/files/Other.Movie.2020/other.rar",
        "",
        "Extracting  /home/u/tmp/boxfetch.Zx81/other.mkv                  12%",
        "...         other.mkv                                            57%",
        "...         other.mkv                                            OK ",
        "All OK",
    ];

    let mut parser = UnpackProgressParser::new();
    let mut outputs = 0;
    for line in transcript {
        parser.feed(line);
        if parser.status_string().is_some() {
            outputs += 1;
        }
    }

    assert_eq!(parser.percentage(), 100);
    assert_eq!(parser.extracted_files(), ["other.mkv".to_string()]);
    assert_eq!(parser.current_volume(), Some("other.rar"));
    assert_eq!(parser.destination_dir(), Some("/home/u/tmp/boxfetch.Zx81"));
    // header, 0%, 57%, completion
    assert_eq!(outputs, 4);
}
