mod triplet;

pub use triplet::TripletMatrix;
